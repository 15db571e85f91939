//! FreezeException Custom Resource Definition.
//!
//! A bounded, scoped allow override: while within [activeFrom, activeTo) it
//! turns a matching deny into an allow, optionally constrained to specific
//! labels, users, or groups.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{Action, Condition, TargetSpec};

/// FreezeException allows the listed actions even when a policy would deny.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "freeze-operator.io",
    version = "v1alpha1",
    kind = "FreezeException",
    plural = "freezeexceptions",
    shortname = "fex",
    status = "FreezeExceptionStatus",
    printcolumn = r#"{"name":"Active", "type":"boolean", "jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"From", "type":"string", "jsonPath":".spec.activeFrom"}"#,
    printcolumn = r#"{"name":"To", "type":"string", "jsonPath":".spec.activeTo"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".spec.reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FreezeExceptionSpec {
    /// When this exception becomes effective (inclusive).
    pub active_from: DateTime<Utc>,

    /// When this exception expires (exclusive). Must be after activeFrom.
    pub active_to: DateTime<Utc>,

    /// Selects namespaces/objects/kinds this exception applies to.
    pub target: TargetSpec,

    /// Actions allowed even when policies would deny (at least one).
    pub allow: Vec<Action>,

    /// Optional constraints limiting who and what can use the exception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<FreezeExceptionConstraintsSpec>,

    /// Why this exception exists. Required.
    pub reason: String,

    /// Link to an approval or tracking ticket.
    #[serde(default, rename = "ticketURL")]
    pub ticket_url: String,

    /// Free-form approver identifier.
    #[serde(default)]
    pub approved_by: String,
}

impl FreezeExceptionSpec {
    /// Whether `now` lies within the exception's effective interval.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.active_from && now < self.active_to
    }
}

/// Optional constraints on exception usage. All present constraints must pass.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FreezeExceptionConstraintsSpec {
    /// Labels that must be present with these exact values on the target object.
    #[serde(default)]
    pub require_labels: BTreeMap<String, String>,

    /// Usernames allowed to use this exception; empty allows anyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Groups allowed to use this exception; empty allows anyone.
    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

/// Observed state of a FreezeException.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FreezeExceptionStatus {
    /// Whether this exception is currently effective.
    #[serde(default)]
    pub active: bool,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state, unique per type.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crd::common::TargetKind;
    use chrono::TimeZone;

    #[test]
    fn test_contains_boundaries() {
        let from = Utc.with_ymd_and_hms(2026, 1, 28, 11, 59, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 28, 12, 1, 0).unwrap();
        let spec = FreezeExceptionSpec {
            active_from: from,
            active_to: to,
            target: TargetSpec {
                namespace_selector: None,
                object_selector: None,
                kinds: vec![TargetKind::Deployment],
            },
            allow: vec![Action::RollOut],
            constraints: None,
            reason: "hotfix".to_string(),
            ticket_url: String::new(),
            approved_by: String::new(),
        };

        assert!(spec.contains(from));
        assert!(!spec.contains(to));
        assert!(spec.contains(Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()));
    }
}
