//! ChangeFreeze Custom Resource Definition.
//!
//! A one-shot deny interval: between `startTime` and `endTime` the listed
//! actions are denied for matching workloads.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{Condition, MessageSpec, PolicyBehaviorSpec, PolicyRulesSpec, TargetSpec};

/// ChangeFreeze denies the listed actions while within its interval.
///
/// Example:
/// ```yaml
/// apiVersion: freeze-operator.io/v1alpha1
/// kind: ChangeFreeze
/// metadata:
///   name: holiday-freeze
/// spec:
///   startTime: "2026-12-20T00:00:00Z"
///   endTime: "2027-01-03T00:00:00Z"
///   target:
///     namespaceSelector:
///       matchLabels:
///         env: prod
///     kinds: [Deployment, StatefulSet]
///   rules:
///     deny: [ROLL_OUT, SCALE]
///   message:
///     reason: "Holiday change freeze"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "freeze-operator.io",
    version = "v1alpha1",
    kind = "ChangeFreeze",
    plural = "changefreezes",
    shortname = "cfz",
    status = "ChangeFreezeStatus",
    printcolumn = r#"{"name":"Active", "type":"boolean", "jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Start", "type":"string", "jsonPath":".spec.startTime"}"#,
    printcolumn = r#"{"name":"End", "type":"string", "jsonPath":".spec.endTime"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFreezeSpec {
    /// Start of the freeze interval (inclusive).
    pub start_time: DateTime<Utc>,

    /// End of the freeze interval (exclusive). Must be after startTime.
    pub end_time: DateTime<Utc>,

    /// Optional IANA timezone name, used for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Selects namespaces/objects/kinds this policy applies to.
    pub target: TargetSpec,

    /// Actions denied while within [startTime, endTime).
    pub rules: PolicyRulesSpec,

    /// Optional side-effects.
    #[serde(default)]
    pub behavior: PolicyBehaviorSpec,

    /// User-facing denial message data.
    #[serde(default)]
    pub message: MessageSpec,
}

impl ChangeFreezeSpec {
    /// Whether `now` lies within the freeze interval.
    ///
    /// The start is inclusive, the end exclusive.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time && now < self.end_time
    }
}

/// Observed state of a ChangeFreeze.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFreezeStatus {
    /// Whether the policy currently enforces denies.
    #[serde(default)]
    pub active: bool,

    /// Time remaining until the freeze ends, while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<String>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state, unique per type.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
