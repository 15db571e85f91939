//! Reconciler for FreezeException overrides.
//!
//! Tracks whether the exception is within its effective interval and
//! re-queues at activation and expiry.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, error, warn};

use crate::controller::change_freeze::whole_seconds;
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Error;
use crate::controller::{
    CONDITION_ACTIVE, CONDITION_READY, DEFAULT_REQUEUE, REASON_ACTIVATED, REASON_DEACTIVATED,
    REASON_EVALUATED, REQUEUE_SLACK,
};
use crate::crd::{
    Condition, FreezeException, FreezeExceptionSpec, FreezeExceptionStatus, upsert_condition,
};
use crate::policy::PolicyKind;

/// Outcome of evaluating an exception interval at one instant.
#[derive(Debug, PartialEq)]
pub(crate) struct ExceptionEvaluation {
    pub active: bool,
    pub requeue_after: StdDuration,
}

/// Evaluate an exception at `now`: active within [activeFrom, activeTo).
pub(crate) fn evaluate_exception(
    spec: &FreezeExceptionSpec,
    now: DateTime<Utc>,
) -> ExceptionEvaluation {
    if spec.contains(now) {
        ExceptionEvaluation {
            active: true,
            requeue_after: whole_seconds(spec.active_to - now) + REQUEUE_SLACK,
        }
    } else if now < spec.active_from {
        ExceptionEvaluation {
            active: false,
            requeue_after: whole_seconds(spec.active_from - now) + REQUEUE_SLACK,
        }
    } else {
        ExceptionEvaluation {
            active: false,
            requeue_after: DEFAULT_REQUEUE,
        }
    }
}

/// Reconcile a FreezeException
pub async fn reconcile(ex: Arc<FreezeException>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = ex.name_any();
    let now = Utc::now();
    let generation = ex.metadata.generation;

    debug!(name = %name, "Reconciling FreezeException");

    let eval = evaluate_exception(&ex.spec, now);
    let was_active = ex.status.as_ref().is_some_and(|s| s.active);

    let mut conditions = ex
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
                &format!(
                    "Exception active until {}",
                    ex.spec.active_to.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
                generation,
            ),
        );
        if !was_active {
            ctx.publish_normal_event(
                &*ex,
                REASON_ACTIVATED,
                "Reconciling",
                Some(format!(
                    "Exception activated: {} (approved by: {})",
                    ex.spec.reason, ex.spec.approved_by
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
                "Exception not active",
                generation,
            ),
        );
        if was_active {
            ctx.publish_normal_event(
                &*ex,
                REASON_DEACTIVATED,
                "Reconciling",
                Some("Exception expired".to_string()),
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
            "Successfully evaluated exception period",
            generation,
        ),
    );

    let status = FreezeExceptionStatus {
        active: eval.active,
        observed_generation: generation,
        conditions,
    };
    let api: Api<FreezeException> = Api::all(ctx.client.clone());
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({"status": status})),
    )
    .await?;

    if let Some(health) = &ctx.health_state {
        health.metrics.set_policy_active(
            PolicyKind::FreezeException.metric_label(),
            &name,
            eval.active,
        );
        health.metrics.observe_reconcile(
            PolicyKind::FreezeException.metric_label(),
            start_time.elapsed().as_secs_f64(),
        );
    }

    debug!(name = %name, active = eval.active, requeue = ?eval.requeue_after, "Reconciled");
    Ok(Action::requeue(eval.requeue_after))
}

/// Error policy for the FreezeException controller
pub fn error_policy(ex: Arc<FreezeException>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = ex.name_any();

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
