//! Reconciler for MaintenanceWindow policies.
//!
//! Evaluates every window against the current time, publishes the open and
//! upcoming windows on status, and re-queues at the next boundary (end of
//! the open window or start of the earliest upcoming one).
//!
//! `status.active` means "enforcing": true exactly when the current time is
//! outside every window. The suspension driver receives the same sense, so
//! CronJobs run only while a window is open.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, error, warn};

use crate::controller::change_freeze::whole_seconds;
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::cronjobs::sync_cronjobs;
use crate::controller::error::Error;
use crate::controller::{
    CONDITION_ACTIVE, CONDITION_READY, DEFAULT_REQUEUE, REASON_ACTIVATED,
    REASON_CRONJOB_UPDATE_FAILED, REASON_CRONJOBS_UPDATED, REASON_DEACTIVATED, REASON_EVALUATED,
    REASON_EVALUATION_FAILED, REQUEUE_SLACK,
};
use crate::crd::{
    Condition, MODE_DENY_OUTSIDE_WINDOWS, MaintenanceWindow, MaintenanceWindowSpec,
    MaintenanceWindowStatus, WindowStatus, upsert_condition,
};
use crate::policy::{PolicyKind, eval_cron_window};

/// Outcome of evaluating all windows at one instant.
#[derive(Debug)]
pub(crate) struct WindowEvaluation {
    /// True when the policy is enforcing, i.e. no window contains now.
    pub enforcing: bool,
    /// The first window whose interval contains now.
    pub active_window: Option<WindowStatus>,
    /// The window with the earliest upcoming start.
    pub next_window: Option<WindowStatus>,
    pub requeue_after: StdDuration,
}

/// Evaluate every window of the policy at `now`.
pub(crate) fn evaluate_windows(
    spec: &MaintenanceWindowSpec,
    now: DateTime<Utc>,
) -> Result<WindowEvaluation, Error> {
    if spec.mode != MODE_DENY_OUTSIDE_WINDOWS {
        return Err(Error::Evaluation(format!(
            "unsupported mode: {}",
            spec.mode
        )));
    }

    let mut active_window = None;
    let mut next_window: Option<WindowStatus> = None;
    let mut earliest_next: Option<DateTime<Utc>> = None;
    let mut requeue_candidates: Vec<StdDuration> = Vec::new();

    for window in &spec.windows {
        let res = eval_cron_window(now, &spec.timezone, &window.schedule, &window.duration)
            .map_err(|e| Error::Evaluation(format!("evaluate window {:?}: {e}", window.name)))?;

        if res.active && active_window.is_none() {
            active_window = Some(WindowStatus {
                name: window.name.clone(),
                start_time: res.active_start,
                end_time: res.active_end,
            });
            if let Some(end) = res.active_end {
                requeue_candidates.push(whole_seconds(end - now));
            }
        }

        if let Some(next_start) = res.next_start {
            if earliest_next.is_none_or(|best| next_start < best) {
                earliest_next = Some(next_start);
                next_window = Some(WindowStatus {
                    name: window.name.clone(),
                    start_time: res.next_start,
                    end_time: res.next_end,
                });
            }
        }
    }

    let enforcing = active_window.is_none();
    if enforcing {
        if let Some(next_start) = earliest_next {
            requeue_candidates.push(whole_seconds(next_start - now));
        }
    }

    let requeue_after = requeue_candidates
        .into_iter()
        .min()
        .map(|d| d + REQUEUE_SLACK)
        .unwrap_or(DEFAULT_REQUEUE);

    Ok(WindowEvaluation {
        enforcing,
        active_window,
        next_window,
        requeue_after,
    })
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Reconcile a MaintenanceWindow
pub async fn reconcile(mw: Arc<MaintenanceWindow>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = mw.name_any();
    let now = Utc::now();
    let generation = mw.metadata.generation;

    debug!(name = %name, "Reconciling MaintenanceWindow");

    let mut conditions = mw
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let eval = match evaluate_windows(&mw.spec, now) {
        Ok(eval) => eval,
        Err(e) => {
            error!(name = %name, error = %e, "Failed to evaluate windows");
            ctx.publish_warning_event(
                &*mw,
                REASON_EVALUATION_FAILED,
                "Reconciling",
                Some(e.to_string()),
            )
            .await;

            upsert_condition(
                &mut conditions,
                Condition::new(
                    CONDITION_READY,
                    false,
                    REASON_EVALUATION_FAILED,
                    &e.to_string(),
                    generation,
                ),
            );
            let status = serde_json::json!({"status": {
                "observedGeneration": generation,
                "conditions": conditions,
            }});
            let api: Api<MaintenanceWindow> = Api::all(ctx.client.clone());
            if let Err(status_err) = api
                .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&status))
                .await
            {
                error!(name = %name, error = %status_err, "Failed to update status after evaluation error");
            }
            return Err(e);
        }
    };

    let was_enforcing = mw.status.as_ref().is_some_and(|s| s.active);

    if eval.enforcing {
        let message = match &eval.next_window {
            Some(next) => format!(
                "Outside maintenance windows; next window {:?} starts at {}",
                next.name,
                next.start_time.map(rfc3339).unwrap_or_default()
            ),
            None => "Outside maintenance windows".to_string(),
        };
        upsert_condition(
            &mut conditions,
            Condition::new(CONDITION_ACTIVE, true, REASON_ACTIVATED, &message, generation),
        );
        if !was_enforcing {
            ctx.publish_normal_event(&*mw, REASON_ACTIVATED, "Reconciling", Some(message)).await;
        }
    } else {
        let open = eval.active_window.as_ref();
        let message = format!(
            "Window {:?} is open until {}",
            open.map(|w| w.name.as_str()).unwrap_or_default(),
            open.and_then(|w| w.end_time).map(rfc3339).unwrap_or_default()
        );
        upsert_condition(
            &mut conditions,
            Condition::new(CONDITION_ACTIVE, false, REASON_DEACTIVATED, &message, generation),
        );
        if was_enforcing {
            ctx.publish_normal_event(&*mw, REASON_DEACTIVATED, "Reconciling", Some(message)).await;
        }
    }
    upsert_condition(
        &mut conditions,
        Condition::new(
            CONDITION_READY,
            true,
            REASON_EVALUATED,
            "Successfully evaluated windows",
            generation,
        ),
    );

    // Suspend CronJobs while outside windows, resume while one is open.
    if mw.spec.behavior.suspend_cron_jobs {
        match sync_cronjobs(&ctx.client, &mw.spec.target, &name, eval.enforcing).await {
            Ok(outcome) => {
                ctx.publish_normal_event(
                    &*mw,
                    REASON_CRONJOBS_UPDATED,
                    "Reconciling",
                    Some(format!(
                        "CronJobs suspend status updated (suspend={})",
                        eval.enforcing
                    )),
                )
                .await;
                if let Some(health) = &ctx.health_state {
                    for (namespace, count) in &outcome.suspended_by_namespace {
                        health.metrics.set_cronjob_suspensions(
                            PolicyKind::MaintenanceWindow.metric_label(),
                            &name,
                            namespace,
                            *count,
                        );
                    }
                }
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to update CronJobs");
                ctx.publish_warning_event(
                    &*mw,
                    REASON_CRONJOB_UPDATE_FAILED,
                    "Reconciling",
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }

    let status = MaintenanceWindowStatus {
        active: eval.enforcing,
        active_window: eval.active_window,
        next_window: eval.next_window,
        observed_generation: generation,
        conditions,
    };
    let api: Api<MaintenanceWindow> = Api::all(ctx.client.clone());
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({"status": status})),
    )
    .await?;

    if let Some(health) = &ctx.health_state {
        health.metrics.set_policy_active(
            PolicyKind::MaintenanceWindow.metric_label(),
            &name,
            eval.enforcing,
        );
        health.metrics.observe_reconcile(
            PolicyKind::MaintenanceWindow.metric_label(),
            start_time.elapsed().as_secs_f64(),
        );
    }

    Ok(Action::requeue(eval.requeue_after))
}

/// Error policy for the MaintenanceWindow controller
pub fn error_policy(mw: Arc<MaintenanceWindow>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = mw.name_any();

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
