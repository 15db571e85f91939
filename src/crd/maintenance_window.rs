//! MaintenanceWindow Custom Resource Definition.
//!
//! A set of recurring allowed intervals; outside all of them the listed
//! actions are denied. Intervals recur on 5-field cron schedules evaluated
//! in the policy's IANA timezone.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{
    Condition, MessageSpec, PolicyBehaviorSpec, PolicyRulesSpec, TargetSpec, WindowStatus,
};

/// The only supported evaluation mode: deny listed actions whenever the
/// current time is outside every window.
///
/// `mode` stays a free-form string so that a policy carrying an unknown mode
/// still deserializes; the controller surfaces it as an evaluation error and
/// the decision engine skips the policy.
pub const MODE_DENY_OUTSIDE_WINDOWS: &str = "DenyOutsideWindows";

/// MaintenanceWindow denies the listed actions outside its recurring windows.
///
/// Example:
/// ```yaml
/// apiVersion: freeze-operator.io/v1alpha1
/// kind: MaintenanceWindow
/// metadata:
///   name: nightly
/// spec:
///   timezone: Europe/Berlin
///   mode: DenyOutsideWindows
///   windows:
///     - name: night
///       schedule: "0 1 * * *"
///       duration: 2h
///   target:
///     kinds: [Deployment]
///   rules:
///     deny: [ROLL_OUT]
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "freeze-operator.io",
    version = "v1alpha1",
    kind = "MaintenanceWindow",
    plural = "maintenancewindows",
    shortname = "mwin",
    status = "MaintenanceWindowStatus",
    printcolumn = r#"{"name":"Active", "type":"boolean", "jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Timezone", "type":"string", "jsonPath":".spec.timezone"}"#,
    printcolumn = r#"{"name":"NextWindow", "type":"string", "jsonPath":".status.nextWindow.startTime"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindowSpec {
    /// IANA timezone name the schedules are evaluated in.
    pub timezone: String,

    /// How windows are interpreted; only "DenyOutsideWindows" is supported.
    pub mode: String,

    /// Allowed maintenance intervals (at least one).
    pub windows: Vec<MaintenanceWindowWindowSpec>,

    /// Selects namespaces/objects/kinds this policy applies to.
    pub target: TargetSpec,

    /// Actions denied while outside all windows.
    pub rules: PolicyRulesSpec,

    /// Optional side-effects.
    #[serde(default)]
    pub behavior: PolicyBehaviorSpec,

    /// User-facing denial message data.
    #[serde(default)]
    pub message: MessageSpec,
}

/// One recurring maintenance window.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindowWindowSpec {
    /// Human-readable identifier.
    pub name: String,

    /// 5-field cron expression (minute, hour, day-of-month, month, day-of-week).
    pub schedule: String,

    /// How long each window lasts, e.g. "1h" or "90m". Must be positive.
    pub duration: String,
}

/// Observed state of a MaintenanceWindow.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindowStatus {
    /// Whether the policy currently enforces denies, i.e. the current time
    /// is outside every window.
    #[serde(default)]
    pub active: bool,

    /// The window containing the current time, when one is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_window: Option<WindowStatus>,

    /// The next upcoming window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_window: Option<WindowStatus>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state, unique per type.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::common::{Action, TargetKind};

    #[test]
    fn test_spec_deserializes_unknown_mode() {
        // An unknown mode must survive deserialization so the controller can
        // surface it on status instead of the watch stream dropping the object.
        let json = r#"{
            "timezone": "UTC",
            "mode": "AllowOutsideWindows",
            "windows": [{"name": "w", "schedule": "0 0 * * *", "duration": "1h"}],
            "target": {"kinds": ["Deployment"]},
            "rules": {"deny": ["ROLL_OUT"]}
        }"#;
        let spec: MaintenanceWindowSpec = match serde_json::from_str(json) {
            Ok(s) => s,
            Err(e) => panic!("deserialization failed: {e}"),
        };
        assert_ne!(spec.mode, MODE_DENY_OUTSIDE_WINDOWS);
        assert_eq!(spec.target.kinds, vec![TargetKind::Deployment]);
        assert_eq!(spec.rules.deny, vec![Action::RollOut]);
    }
}
