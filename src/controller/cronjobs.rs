//! CronJob suspension driver.
//!
//! Policies that opt into `behavior.suspendCronJobs` walk CronJobs matching
//! their target and drive the suspend flag. Ownership is cooperative: the
//! first managing policy stamps a `managed-by` annotation, and other
//! policies skip objects it claimed. The pre-management suspend value is
//! recorded once in `original-suspend`; the driver does not restore it when
//! coverage ends, the annotation exists so operators can.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Error;
use crate::crd::{TargetKind, TargetSpec};
use crate::policy::selectors::selector_matches;

/// Records the suspend value a CronJob had before any policy managed it.
pub const ANNOTATION_ORIGINAL_SUSPEND: &str = "freeze-operator.io/original-suspend";
/// Names the policy that manages a CronJob's suspend flag.
pub const ANNOTATION_MANAGED_BY: &str = "freeze-operator.io/managed-by";

/// What one driver pass did.
#[derive(Debug, Default)]
pub struct SuspensionOutcome {
    /// CronJobs whose suspend flag or annotations were written.
    pub updated: u32,
    /// CronJobs skipped because another policy manages them.
    pub skipped_conflicts: u32,
    /// CronJobs this policy holds suspended, per namespace.
    pub suspended_by_namespace: BTreeMap<String, i64>,
}

/// Drive the suspend flag of CronJobs matching `target` to `should_suspend`.
///
/// No-op unless CronJob is among the target kinds.
pub async fn sync_cronjobs(
    client: &Client,
    target: &TargetSpec,
    policy_name: &str,
    should_suspend: bool,
) -> Result<SuspensionOutcome, Error> {
    let mut outcome = SuspensionOutcome::default();

    if !target.kinds.contains(&TargetKind::CronJob) {
        return Ok(outcome);
    }

    let ns_api: Api<Namespace> = Api::all(client.clone());
    let namespaces = ns_api.list(&ListParams::default()).await?;

    for namespace in &namespaces.items {
        let ns_labels = namespace.metadata.labels.clone().unwrap_or_default();
        match selector_matches(target.namespace_selector.as_ref(), &ns_labels) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!(error = %e, "Treating invalid namespace selector as non-matching");
                continue;
            }
        }

        let ns_name = namespace.name_any();
        let cron_api: Api<CronJob> = Api::namespaced(client.clone(), &ns_name);
        let cronjobs = cron_api.list(&ListParams::default()).await?;

        for cron in &cronjobs.items {
            let labels = cron.metadata.labels.clone().unwrap_or_default();
            match selector_matches(target.object_selector.as_ref(), &labels) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(error = %e, "Treating invalid object selector as non-matching");
                    continue;
                }
            }

            let annotations = cron.metadata.annotations.clone().unwrap_or_default();
            let managed_by = annotations
                .get(ANNOTATION_MANAGED_BY)
                .map(String::as_str)
                .unwrap_or_default();

            let current_suspend = cron
                .spec
                .as_ref()
                .and_then(|s| s.suspend)
                .unwrap_or(false);

            let patch = if managed_by.is_empty() {
                // First management: record the original state and claim the object.
                Some(serde_json::json!({
                    "metadata": {
                        "annotations": {
                            ANNOTATION_ORIGINAL_SUSPEND: current_suspend.to_string(),
                            ANNOTATION_MANAGED_BY: policy_name,
                        }
                    },
                    "spec": {"suspend": should_suspend}
                }))
            } else if managed_by != policy_name {
                // Claimed by a different policy; leave it alone.
                debug!(
                    cronjob = %cron.name_any(),
                    namespace = %ns_name,
                    managed_by = %managed_by,
                    "Skipping CronJob managed by another policy"
                );
                outcome.skipped_conflicts += 1;
                None
            } else if current_suspend != should_suspend {
                Some(serde_json::json!({"spec": {"suspend": should_suspend}}))
            } else {
                None
            };

            if let Some(patch) = patch {
                cron_api
                    .patch(
                        &cron.name_any(),
                        &PatchParams::apply(FIELD_MANAGER),
                        &Patch::Merge(&patch),
                    )
                    .await?;
                outcome.updated += 1;
            }

            let managed_here = managed_by.is_empty() || managed_by == policy_name;
            if managed_here && should_suspend {
                *outcome.suspended_by_namespace.entry(ns_name.clone()).or_default() += 1;
            }
        }
    }

    Ok(outcome)
}
