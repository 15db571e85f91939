//! Input and output types of the policy decision engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::crd::{Action, TargetKind};

/// The policy kinds a decision can reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PolicyKind {
    ChangeFreeze,
    MaintenanceWindow,
    FreezeException,
}

impl PolicyKind {
    /// Lowercase form used as the `policy_type` metric label.
    pub fn metric_label(&self) -> &'static str {
        match self {
            PolicyKind::ChangeFreeze => "changefreeze",
            PolicyKind::MaintenanceWindow => "maintenancewindow",
            PolicyKind::FreezeException => "freezeexception",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::ChangeFreeze => write!(f, "ChangeFreeze"),
            PolicyKind::MaintenanceWindow => write!(f, "MaintenanceWindow"),
            PolicyKind::FreezeException => write!(f, "FreezeException"),
        }
    }
}

/// Reference to a specific policy object, rendered as `<Kind>/<name>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyRef {
    pub kind: PolicyKind,
    pub name: String,
}

impl std::fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One admission request, normalized for evaluation.
#[derive(Clone, Debug)]
pub struct Input {
    /// Evaluation instant; current UTC when absent.
    pub now: Option<DateTime<Utc>>,

    /// Target namespace. Required.
    pub namespace: String,

    /// Labels of the target namespace; fetched from the store when absent.
    pub namespace_labels: Option<BTreeMap<String, String>>,

    /// Workload kind of the request.
    pub kind: TargetKind,

    /// Classified action of the request.
    pub action: Action,

    /// Labels of the target object.
    pub object_labels: BTreeMap<String, String>,

    /// Requesting username, for exception constraints.
    pub username: String,

    /// Requesting user's groups, for exception constraints.
    pub groups: Vec<String>,
}

/// Outcome of evaluating one admission request against all policies.
#[derive(Clone, Debug)]
pub struct Decision {
    /// Whether the request is allowed.
    pub allowed: bool,

    /// The winning deny policy, when any matched (also set on an
    /// exception-overridden allow).
    pub matched_policy: Option<PolicyRef>,

    /// The exception that flipped the deny to an allow, when one applied.
    pub matched_override: Option<PolicyRef>,

    /// Human-readable reason for the outcome.
    pub reason: String,

    /// Earliest time the denied action becomes allowed, when derivable.
    pub next_allowed_time: Option<DateTime<Utc>>,

    /// End of the winning freeze interval, for one-shot freezes.
    pub freeze_end_time: Option<DateTime<Utc>>,

    /// The instant the decision was evaluated at.
    pub evaluation_time: DateTime<Utc>,

    /// Echo of the evaluated namespace.
    pub namespace: String,

    /// Echo of the evaluated kind.
    pub kind: TargetKind,

    /// Echo of the evaluated action.
    pub action: Action,
}
