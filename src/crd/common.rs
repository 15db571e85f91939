//! Spec fragments shared by all policy kinds.
//!
//! Every policy carries the same targeting triple (namespace selector,
//! object selector, kinds), deny/allow action sets, and user-facing message
//! data; only the "when" predicate differs per kind.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An operation category that policies can deny and exceptions can allow.
///
/// UPDATE requests are mapped into the more specific ROLL_OUT / SCALE by the
/// update classifier before evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Action {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "ROLL_OUT")]
    RollOut,
    #[serde(rename = "SCALE")]
    Scale,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "CREATE"),
            Action::Delete => write!(f, "DELETE"),
            Action::RollOut => write!(f, "ROLL_OUT"),
            Action::Scale => write!(f, "SCALE"),
        }
    }
}

/// Workload kinds that policies can target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TargetKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    CronJob,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Deployment => write!(f, "Deployment"),
            TargetKind::StatefulSet => write!(f, "StatefulSet"),
            TargetKind::DaemonSet => write!(f, "DaemonSet"),
            TargetKind::CronJob => write!(f, "CronJob"),
        }
    }
}

/// Selects the namespaces, objects, and kinds a policy applies to.
///
/// All three parts are ANDed; an absent selector matches everything.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Selects target namespaces by labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Selects target objects by labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,

    /// Workload kinds the policy applies to (at least one).
    pub kinds: Vec<TargetKind>,
}

/// Deny rules for a policy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRulesSpec {
    /// Actions denied while the policy is enforcing (at least one).
    pub deny: Vec<Action>,
}

/// User-facing denial message data.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageSpec {
    /// Short human-readable description shown on denials.
    #[serde(default)]
    pub reason: String,

    /// Link to documentation.
    #[serde(default, rename = "docsURL")]
    pub docs_url: String,

    /// Contact point (team, oncall, etc.).
    #[serde(default)]
    pub contact: String,
}

/// Optional side-effects a policy can opt into.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBehaviorSpec {
    /// Suspend matching CronJobs while the policy is enforcing.
    #[serde(default)]
    pub suspend_cron_jobs: bool,
}

/// An evaluated maintenance window interval, reported on status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WindowStatus {
    /// Name of the window.
    #[serde(default)]
    pub name: String,

    /// Start of the interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// End of the interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Condition describes one aspect of a policy's state; unique per type.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition ("Ready", "Active").
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create an "Active" condition.
    pub fn active(active: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Active", active, reason, message, generation)
    }
}

/// Insert or replace a condition, keyed by type.
///
/// The transition timestamp is preserved when the status did not change, so
/// repeated reconciles with an unchanged outcome leave it stable.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut next: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == next.r#type) {
        if existing.status == next.status {
            next.last_transition_time = existing.last_transition_time.clone();
        }
        *existing = next;
    } else {
        conditions.push(next);
    }
}
