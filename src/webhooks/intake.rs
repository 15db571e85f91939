//! Intake validation for the policy resources themselves.
//!
//! Rejects malformed policies at CREATE/UPDATE time: inverted intervals,
//! unknown timezones, unparseable cron schedules, non-positive durations.
//! CREATE additionally rejects a name already taken by a policy of another
//! kind: the CronJob `managed-by` annotation records the bare policy name,
//! so names must be unique across the three kinds. DELETE is always allowed.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono_tz::Tz;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{error, info};

use crate::crd::{
    ChangeFreeze, ChangeFreezeSpec, FreezeException, FreezeExceptionSpec, MODE_DENY_OUTSIDE_WINDOWS,
    MaintenanceWindow, MaintenanceWindowSpec,
};
use crate::policy::windows::{parse_schedule, parse_window_duration};
use crate::webhooks::server::WebhookState;

/// Validate the shape of a ChangeFreeze.
pub(crate) fn validate_change_freeze_spec(spec: &ChangeFreezeSpec) -> Result<(), String> {
    if spec.end_time <= spec.start_time {
        return Err("spec.endTime: must be after startTime".to_string());
    }
    if let Some(tz) = &spec.timezone {
        if tz.parse::<Tz>().is_err() {
            return Err(format!("spec.timezone: invalid timezone {tz:?}"));
        }
    }
    if spec.target.kinds.is_empty() {
        return Err("spec.target.kinds: must list at least one kind".to_string());
    }
    if spec.rules.deny.is_empty() {
        return Err("spec.rules.deny: must list at least one action".to_string());
    }
    Ok(())
}

/// Validate the shape of a MaintenanceWindow.
pub(crate) fn validate_maintenance_window_spec(spec: &MaintenanceWindowSpec) -> Result<(), String> {
    if spec.timezone.parse::<Tz>().is_err() {
        return Err(format!("spec.timezone: invalid timezone {:?}", spec.timezone));
    }
    if spec.mode != MODE_DENY_OUTSIDE_WINDOWS {
        return Err(format!("spec.mode: unsupported mode {:?}", spec.mode));
    }
    if spec.windows.is_empty() {
        return Err("spec.windows: must have at least one window".to_string());
    }
    for (i, window) in spec.windows.iter().enumerate() {
        if let Err(e) = parse_schedule(&window.schedule) {
            return Err(format!("spec.windows[{i}].schedule: {e}"));
        }
        if let Err(e) = parse_window_duration(&window.duration) {
            return Err(format!("spec.windows[{i}].duration: {e}"));
        }
    }
    if spec.target.kinds.is_empty() {
        return Err("spec.target.kinds: must list at least one kind".to_string());
    }
    if spec.rules.deny.is_empty() {
        return Err("spec.rules.deny: must list at least one action".to_string());
    }
    Ok(())
}

/// Validate the shape of a FreezeException.
pub(crate) fn validate_freeze_exception_spec(spec: &FreezeExceptionSpec) -> Result<(), String> {
    if spec.active_to <= spec.active_from {
        return Err("spec.activeTo: must be after activeFrom".to_string());
    }
    if spec.target.kinds.is_empty() {
        return Err("spec.target.kinds: must list at least one kind".to_string());
    }
    if spec.allow.is_empty() {
        return Err("spec.allow: must list at least one action".to_string());
    }
    if spec.reason.is_empty() {
        return Err("spec.reason: must not be empty".to_string());
    }
    Ok(())
}

/// Look up `name` among the policy kinds other than `kind`.
///
/// Returns the denial message when another kind already owns the name.
async fn find_cross_kind_collision(
    client: &Client,
    kind: &'static str,
    name: &str,
) -> Result<Option<String>, kube::Error> {
    if kind != "ChangeFreeze" {
        let api: Api<ChangeFreeze> = Api::all(client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(Some(collision_message("ChangeFreeze", name)));
        }
    }
    if kind != "MaintenanceWindow" {
        let api: Api<MaintenanceWindow> = Api::all(client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(Some(collision_message("MaintenanceWindow", name)));
        }
    }
    if kind != "FreezeException" {
        let api: Api<FreezeException> = Api::all(client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(Some(collision_message("FreezeException", name)));
        }
    }
    Ok(None)
}

fn collision_message(existing_kind: &str, name: &str) -> String {
    format!(
        "metadata.name: a {existing_kind} named {name:?} already exists; \
         policy names must be unique across policy kinds"
    )
}

/// Shared intake handler: extract the typed object, run `validate`, and on
/// CREATE reject names already taken by another policy kind.
async fn handle_intake<K, F>(
    state: &WebhookState,
    review: AdmissionReview<K>,
    kind: &'static str,
    validate: F,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
    F: FnOnce(&K) -> Result<(), String>,
{
    let request: AdmissionRequest<K> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(kind = kind, error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    // Deleting a policy is never validated.
    if request.operation == Operation::Delete {
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let Some(object) = request.object.as_ref() else {
        return (
            StatusCode::OK,
            Json(
                AdmissionResponse::from(&request)
                    .deny("missing object in request")
                    .into_review(),
            ),
        );
    };

    if let Err(message) = validate(object) {
        info!(kind = kind, name = %request.name, message = %message, "Policy intake denied");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).deny(message).into_review()),
        );
    }

    // Names are immutable, so only CREATE can introduce a collision.
    if request.operation == Operation::Create && !request.name.is_empty() {
        match find_cross_kind_collision(&state.client, kind, &request.name).await {
            Ok(None) => {}
            Ok(Some(message)) => {
                info!(kind = kind, name = %request.name, message = %message, "Policy intake denied");
                return (
                    StatusCode::OK,
                    Json(AdmissionResponse::from(&request).deny(message).into_review()),
                );
            }
            Err(e) => {
                error!(kind = kind, name = %request.name, error = %e, "Policy name lookup failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(
                        AdmissionResponse::invalid(format!(
                            "check policy name {:?}: {e}",
                            request.name
                        ))
                        .into_review(),
                    ),
                );
            }
        }
    }

    info!(kind = kind, name = %request.name, "Policy intake allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(&request).into_review()),
    )
}

/// ChangeFreeze intake webhook handler.
pub(crate) async fn validate_change_freeze(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<ChangeFreeze>>,
) -> impl IntoResponse {
    handle_intake(&state, review, "ChangeFreeze", |cf| {
        validate_change_freeze_spec(&cf.spec)
    })
    .await
}

/// MaintenanceWindow intake webhook handler.
pub(crate) async fn validate_maintenance_window(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<MaintenanceWindow>>,
) -> impl IntoResponse {
    handle_intake(&state, review, "MaintenanceWindow", |mw| {
        validate_maintenance_window_spec(&mw.spec)
    })
    .await
}

/// FreezeException intake webhook handler.
pub(crate) async fn validate_freeze_exception(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<FreezeException>>,
) -> impl IntoResponse {
    handle_intake(&state, review, "FreezeException", |ex| {
        validate_freeze_exception_spec(&ex.spec)
    })
    .await
}
