//! Reconciler for ChangeFreeze policies.
//!
//! Keeps `status.active` aligned with the freeze interval, emits transition
//! events, optionally drives CronJob suspension, and re-queues exactly at
//! the next interval boundary.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, error, warn};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::cronjobs::sync_cronjobs;
use crate::controller::error::Error;
use crate::controller::{
    CONDITION_ACTIVE, CONDITION_READY, DEFAULT_REQUEUE, REASON_ACTIVATED,
    REASON_CRONJOB_UPDATE_FAILED, REASON_CRONJOBS_UPDATED, REASON_DEACTIVATED, REASON_EVALUATED,
    REQUEUE_SLACK,
};
use crate::crd::{ChangeFreeze, ChangeFreezeSpec, ChangeFreezeStatus, Condition, upsert_condition};
use crate::policy::PolicyKind;

/// Outcome of evaluating a freeze interval at one instant.
#[derive(Debug, PartialEq)]
pub(crate) struct FreezeEvaluation {
    pub active: bool,
    pub time_remaining: Option<StdDuration>,
    pub requeue_after: StdDuration,
}

/// Evaluate a freeze at `now`: active within [start, end), requeue at the
/// next boundary, coarse requeue once the interval has fully elapsed.
pub(crate) fn evaluate_freeze(spec: &ChangeFreezeSpec, now: DateTime<Utc>) -> FreezeEvaluation {
    if spec.contains(now) {
        let remaining = whole_seconds(spec.end_time - now);
        FreezeEvaluation {
            active: true,
            time_remaining: Some(remaining),
            requeue_after: remaining + REQUEUE_SLACK,
        }
    } else if now < spec.start_time {
        FreezeEvaluation {
            active: false,
            time_remaining: None,
            requeue_after: whole_seconds(spec.start_time - now) + REQUEUE_SLACK,
        }
    } else {
        FreezeEvaluation {
            active: false,
            time_remaining: None,
            requeue_after: DEFAULT_REQUEUE,
        }
    }
}

/// Truncate a chrono duration to whole seconds of std time.
pub(crate) fn whole_seconds(duration: chrono::Duration) -> StdDuration {
    StdDuration::from_secs(duration.num_seconds().max(0) as u64)
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Reconcile a ChangeFreeze
pub async fn reconcile(cf: Arc<ChangeFreeze>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = cf.name_any();
    let now = Utc::now();

    debug!(name = %name, "Reconciling ChangeFreeze");

    let eval = evaluate_freeze(&cf.spec, now);
    let was_active = cf.status.as_ref().is_some_and(|s| s.active);
    let generation = cf.metadata.generation;

    let mut conditions = cf
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    if eval.active {
        upsert_condition(
            &mut conditions,
            Condition::new(
                CONDITION_ACTIVE,
                true,
                REASON_ACTIVATED,
                &format!("Freeze active until {}", rfc3339(cf.spec.end_time)),
                generation,
            ),
        );
        if !was_active {
            ctx.publish_warning_event(
                &*cf,
                REASON_ACTIVATED,
                "Reconciling",
                Some(format!(
                    "Change freeze activated until {}",
                    rfc3339(cf.spec.end_time)
                )),
            )
            .await;
        }
    } else {
        upsert_condition(
            &mut conditions,
            Condition::new(
                CONDITION_ACTIVE,
                false,
                REASON_DEACTIVATED,
                "Freeze not active",
                generation,
            ),
        );
        if was_active {
            ctx.publish_normal_event(
                &*cf,
                REASON_DEACTIVATED,
                "Reconciling",
                Some("Change freeze deactivated".to_string()),
            )
            .await;
        }
    }
    upsert_condition(
        &mut conditions,
        Condition::new(
            CONDITION_READY,
            true,
            REASON_EVALUATED,
            "Successfully evaluated freeze period",
            generation,
        ),
    );

    // ChangeFreeze suspends CronJobs exactly while the freeze is on.
    if cf.spec.behavior.suspend_cron_jobs {
        match sync_cronjobs(&ctx.client, &cf.spec.target, &name, eval.active).await {
            Ok(outcome) => {
                ctx.publish_normal_event(
                    &*cf,
                    REASON_CRONJOBS_UPDATED,
                    "Reconciling",
                    Some(format!(
                        "CronJobs suspend status updated (suspend={})",
                        eval.active
                    )),
                )
                .await;
                if let Some(health) = &ctx.health_state {
                    for (namespace, count) in &outcome.suspended_by_namespace {
                        health.metrics.set_cronjob_suspensions(
                            PolicyKind::ChangeFreeze.metric_label(),
                            &name,
                            namespace,
                            *count,
                        );
                    }
                }
            }
            Err(e) => {
                // Non-fatal: enforcement does not depend on the side effect.
                warn!(name = %name, error = %e, "Failed to update CronJobs");
                ctx.publish_warning_event(
                    &*cf,
                    REASON_CRONJOB_UPDATE_FAILED,
                    "Reconciling",
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }

    let status = ChangeFreezeStatus {
        active: eval.active,
        time_remaining: eval
            .time_remaining
            .map(|d| humantime::format_duration(d).to_string()),
        observed_generation: generation,
        conditions,
    };
    let api: Api<ChangeFreeze> = Api::all(ctx.client.clone());
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({"status": status})),
    )
    .await?;

    if let Some(health) = &ctx.health_state {
        health.metrics.set_policy_active(
            PolicyKind::ChangeFreeze.metric_label(),
            &name,
            eval.active,
        );
        health.metrics.observe_reconcile(
            PolicyKind::ChangeFreeze.metric_label(),
            start_time.elapsed().as_secs_f64(),
        );
    }

    Ok(Action::requeue(eval.requeue_after))
}

/// Error policy for the ChangeFreeze controller
pub fn error_policy(cf: Arc<ChangeFreeze>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = cf.name_any();

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
