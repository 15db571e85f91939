//! Workload admission enforcement.
//!
//! Translates inbound admission requests into evaluator inputs, calls the
//! decision engine, and renders the response. Requests outside the enforced
//! kinds, cluster-scoped requests, terminating namespaces, and the
//! operator's own service accounts are always allowed.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::SecondsFormat;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

use crate::classify::{Workload, classify_update, map_group_kind};
use crate::crd::{Action, TargetKind};
use crate::policy::{Decision, Evaluator, Input, KubeClusterStore};
use crate::webhooks::server::WebhookState;

/// How a request relates to the scale subresource.
#[derive(Debug, PartialEq)]
enum ScaleDisposition {
    /// Not a scale subresource request; classify normally.
    NotScale,
    /// A scale subresource request that is always allowed.
    Allow(&'static str),
    /// A scale UPDATE on an enforced kind; the action is SCALE.
    Enforce(TargetKind),
}

/// `kubectl scale` hits the /scale subresource, which would bypass
/// enforcement if only the workload kinds were matched. UPDATEs of
/// deployments/scale and statefulsets/scale are classified as SCALE;
/// everything else on the subresource is allowed.
fn scale_disposition(
    sub_resource: Option<&str>,
    group: &str,
    resource: &str,
    operation: &Operation,
) -> ScaleDisposition {
    if sub_resource != Some("scale") || group != "apps" {
        return ScaleDisposition::NotScale;
    }
    if *operation != Operation::Update {
        return ScaleDisposition::Allow("scale subresource non-update");
    }
    match resource {
        "deployments" => ScaleDisposition::Enforce(TargetKind::Deployment),
        "statefulsets" => ScaleDisposition::Enforce(TargetKind::StatefulSet),
        _ => ScaleDisposition::Allow("scale subresource not enforced"),
    }
}

/// Whether the requester is the operator itself.
///
/// The operator mutates CronJobs while policies are enforcing; without this
/// bypass it would deadlock against its own webhook.
fn is_operator_bypass(groups: &[String], operator_namespace: &str) -> bool {
    if operator_namespace.is_empty() {
        return false;
    }
    let operator_group = format!("system:serviceaccounts:{operator_namespace}");
    groups.iter().any(|g| *g == operator_group)
}

/// Render the user-visible denial message.
pub fn format_deny_message(decision: &Decision) -> String {
    let mut parts = Vec::new();
    if let Some(policy) = &decision.matched_policy {
        parts.push(format!("Denied by {policy}"));
    }
    if !decision.reason.is_empty() {
        parts.push(decision.reason.clone());
    }
    if let Some(next) = decision.next_allowed_time {
        parts.push(format!(
            "Next allowed at {}",
            next.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    } else if let Some(end) = decision.freeze_end_time {
        parts.push(format!(
            "Allowed after {}",
            end.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    parts.join(": ")
}

type ReviewResponse = (StatusCode, Json<AdmissionReview<DynamicObject>>);

fn allow(request: &AdmissionRequest<DynamicObject>, reason: &str, uid: &str) -> ReviewResponse {
    debug!(uid = %uid, reason = %reason, "Admission request allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(request).into_review()),
    )
}

fn errored(status: StatusCode, message: String) -> ReviewResponse {
    error!(message = %message, "Admission request errored");
    (status, Json(AdmissionResponse::invalid(message).into_review()))
}

/// Validate a workload admission request against all freeze policies.
pub(crate) async fn validate_workloads(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let uid = request.uid.clone();
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing workload admission request"
    );

    let groups = request.user_info.groups.clone().unwrap_or_default();
    if is_operator_bypass(&groups, &state.operator_namespace) {
        return allow(&request, "operator serviceaccount bypass", &uid);
    }

    let (kind, action, object_labels) = match scale_disposition(
        request.sub_resource.as_deref(),
        &request.resource.group,
        &request.resource.resource,
        &request.operation,
    ) {
        ScaleDisposition::Allow(reason) => return allow(&request, reason, &uid),
        ScaleDisposition::Enforce(scale_kind) => {
            // Scale subresource payloads carry no workload labels; fetch the
            // workload itself for objectSelector/constraint evaluation.
            let namespace = request.namespace.clone().unwrap_or_default();
            let name = request.name.clone();
            if namespace.is_empty() || name.is_empty() {
                return allow(&request, "scale request missing namespace or name", &uid);
            }
            let labels = match fetch_workload_labels(&state.client, scale_kind, &namespace, &name)
                .await
            {
                Ok(labels) => labels,
                Err(e) => {
                    return errored(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("get {scale_kind} {namespace}/{name}: {e}"),
                    );
                }
            };
            (scale_kind, Action::Scale, labels)
        }
        ScaleDisposition::NotScale => {
            let Some(mapped) = map_group_kind(&request.kind.group, &request.kind.kind) else {
                return allow(&request, "kind not enforced", &uid);
            };
            match classify_request(&request, mapped) {
                Ok((action, labels)) => (mapped, action, labels),
                Err(message) => return errored(StatusCode::BAD_REQUEST, message),
            }
        }
    };

    let Some(namespace) = request.namespace.clone().filter(|ns| !ns.is_empty()) else {
        // Workloads are namespaced; anything cluster-scoped here is allowed.
        return allow(&request, "cluster-scoped request", &uid);
    };

    let ns_api: Api<Namespace> = Api::all(state.client.clone());
    let ns_obj = match ns_api.get(&namespace).await {
        Ok(ns) => ns,
        Err(e) => {
            return errored(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("get namespace {namespace:?}: {e}"),
            );
        }
    };

    // Never block operations inside a terminating namespace: the namespace is
    // already going away, and blocking finalizer cleanup can deadlock it.
    if ns_obj.metadata.deletion_timestamp.is_some() {
        return allow(&request, "namespace is terminating: bypass freeze policies", &uid);
    }

    let store = KubeClusterStore::new(state.client.clone());
    let evaluator = Evaluator::new(&store);
    let decision = match evaluator
        .evaluate(Input {
            now: None,
            namespace: namespace.clone(),
            namespace_labels: Some(ns_obj.metadata.labels.unwrap_or_default()),
            kind,
            action,
            object_labels,
            username: request.user_info.username.clone().unwrap_or_default(),
            groups,
        })
        .await
    {
        Ok(decision) => decision,
        Err(e) => return errored(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    if let Some(health) = &state.health_state {
        record_decision_metrics(health, &decision);
    }

    if decision.allowed {
        info!(uid = %uid, namespace = %namespace, kind = %kind, action = %action, "Admission request allowed");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let message = format_deny_message(&decision);
    warn!(
        uid = %uid,
        namespace = %namespace,
        kind = %kind,
        action = %action,
        user = ?request.user_info.username,
        policy = ?decision.matched_policy,
        reason = %decision.reason,
        "Admission request denied"
    );
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(&request).deny(message).into_review()),
    )
}

/// Classify a non-scale request into (action, object labels).
fn classify_request(
    request: &AdmissionRequest<DynamicObject>,
    kind: TargetKind,
) -> Result<(Action, std::collections::BTreeMap<String, String>), String> {
    match request.operation {
        Operation::Create => {
            let obj = request.object.as_ref().ok_or("missing object in request")?;
            let workload = Workload::decode(kind, obj).map_err(|e| e.to_string())?;
            Ok((Action::Create, workload.labels()))
        }
        Operation::Delete => {
            let obj = request
                .old_object
                .as_ref()
                .ok_or("missing old object in request")?;
            let workload = Workload::decode(kind, obj).map_err(|e| e.to_string())?;
            Ok((Action::Delete, workload.labels()))
        }
        Operation::Update => {
            let old_obj = request
                .old_object
                .as_ref()
                .ok_or("missing old object in request")?;
            let new_obj = request.object.as_ref().ok_or("missing object in request")?;
            let old = Workload::decode(kind, old_obj).map_err(|e| e.to_string())?;
            let new = Workload::decode(kind, new_obj).map_err(|e| e.to_string())?;
            let action = classify_update(&old, &new).map_err(|e| e.to_string())?;
            Ok((action, new.labels()))
        }
        ref other => Err(format!("unsupported operation: {other:?}")),
    }
}

async fn fetch_workload_labels(
    client: &Client,
    kind: TargetKind,
    namespace: &str,
    name: &str,
) -> Result<std::collections::BTreeMap<String, String>, kube::Error> {
    match kind {
        TargetKind::Deployment => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
            Ok(api.get(name).await?.metadata.labels.unwrap_or_default())
        }
        TargetKind::StatefulSet => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
            Ok(api.get(name).await?.metadata.labels.unwrap_or_default())
        }
        // Only Deployments and StatefulSets expose the scale subresource here.
        TargetKind::DaemonSet | TargetKind::CronJob => Ok(Default::default()),
    }
}

fn record_decision_metrics(health: &crate::health::HealthState, decision: &Decision) {
    let kind = decision.kind.to_string();
    let action = decision.action.to_string();
    if decision.allowed {
        health
            .metrics
            .record_allowed(&decision.namespace, &kind, &action);
        if let (Some(exception), Some(policy)) =
            (&decision.matched_override, &decision.matched_policy)
        {
            health.metrics.record_override(
                &exception.name,
                policy.kind.metric_label(),
                &policy.name,
            );
        }
    } else if let Some(policy) = &decision.matched_policy {
        health.metrics.record_denied(
            policy.kind.metric_label(),
            &policy.name,
            &decision.namespace,
            &kind,
            &action,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::{PolicyKind, PolicyRef};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_scale_disposition() {
        // UPDATE on deployments/scale is enforced as SCALE.
        assert_eq!(
            scale_disposition(Some("scale"), "apps", "deployments", &Operation::Update),
            ScaleDisposition::Enforce(TargetKind::Deployment)
        );
        assert_eq!(
            scale_disposition(Some("scale"), "apps", "statefulsets", &Operation::Update),
            ScaleDisposition::Enforce(TargetKind::StatefulSet)
        );
        // Non-UPDATE scale requests are allowed.
        assert_eq!(
            scale_disposition(Some("scale"), "apps", "deployments", &Operation::Create),
            ScaleDisposition::Allow("scale subresource non-update")
        );
        // Scale of anything else is allowed.
        assert_eq!(
            scale_disposition(Some("scale"), "apps", "replicasets", &Operation::Update),
            ScaleDisposition::Allow("scale subresource not enforced")
        );
        // Plain requests classify normally.
        assert_eq!(
            scale_disposition(None, "apps", "deployments", &Operation::Update),
            ScaleDisposition::NotScale
        );
        assert_eq!(
            scale_disposition(Some("status"), "apps", "deployments", &Operation::Update),
            ScaleDisposition::NotScale
        );
    }

    #[test]
    fn test_operator_bypass() {
        let groups = vec![
            "system:authenticated".to_string(),
            "system:serviceaccounts:freeze-system".to_string(),
        ];
        assert!(is_operator_bypass(&groups, "freeze-system"));
        assert!(!is_operator_bypass(&groups, "other-ns"));
        // Without a known operator namespace the bypass is disabled.
        assert!(!is_operator_bypass(&groups, ""));
    }

    fn decision(
        next_allowed: Option<chrono::DateTime<Utc>>,
        freeze_end: Option<chrono::DateTime<Utc>>,
    ) -> Decision {
        Decision {
            allowed: false,
            matched_policy: Some(PolicyRef {
                kind: PolicyKind::ChangeFreeze,
                name: "cf".to_string(),
            }),
            matched_override: None,
            reason: "freeze".to_string(),
            next_allowed_time: next_allowed,
            freeze_end_time: freeze_end,
            evaluation_time: Utc::now(),
            namespace: "prod".to_string(),
            kind: TargetKind::Deployment,
            action: Action::RollOut,
        }
    }

    #[test]
    fn test_deny_message_with_next_allowed() {
        let end = Utc.with_ymd_and_hms(2026, 1, 28, 13, 0, 0).unwrap();
        let msg = format_deny_message(&decision(Some(end), Some(end)));
        assert_eq!(
            msg,
            "Denied by ChangeFreeze/cf: freeze: Next allowed at 2026-01-28T13:00:00Z"
        );
    }

    #[test]
    fn test_deny_message_with_only_freeze_end() {
        let end = Utc.with_ymd_and_hms(2026, 1, 28, 13, 0, 0).unwrap();
        let msg = format_deny_message(&decision(None, Some(end)));
        assert_eq!(
            msg,
            "Denied by ChangeFreeze/cf: freeze: Allowed after 2026-01-28T13:00:00Z"
        );
    }

    #[test]
    fn test_deny_message_without_times() {
        let msg = format_deny_message(&decision(None, None));
        assert_eq!(msg, "Denied by ChangeFreeze/cf: freeze");
    }
}
