//! Update classification.
//!
//! Decides whether a workload UPDATE is a ROLL_OUT or a SCALE. Equality is
//! semantic: objects are decoded into their typed form and compared via the
//! serde-normalized value, which drops unknown fields, absent optionals,
//! and map ordering, so server-assigned noise never flips the outcome.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use kube::core::DynamicObject;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::crd::{Action, TargetKind};

/// Failures classifying an update.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The admission payload does not decode as the expected kind.
    #[error("decode {kind} payload: {source}")]
    Decode {
        kind: TargetKind,
        #[source]
        source: serde_json::Error,
    },

    /// Old and new objects decoded to different kinds.
    #[error("mismatched workload kinds in update: {old} vs {new}")]
    KindMismatch { old: TargetKind, new: TargetKind },
}

/// A workload object of one of the enforced kinds.
pub enum Workload {
    Deployment(Box<Deployment>),
    StatefulSet(Box<StatefulSet>),
    DaemonSet(Box<DaemonSet>),
    CronJob(Box<CronJob>),
}

/// Map an admission group/kind pair onto an enforced kind.
///
/// Anything outside the four enforced kinds returns `None` and is allowed.
pub fn map_group_kind(group: &str, kind: &str) -> Option<TargetKind> {
    match (group, kind) {
        ("apps", "Deployment") => Some(TargetKind::Deployment),
        ("apps", "StatefulSet") => Some(TargetKind::StatefulSet),
        ("apps", "DaemonSet") => Some(TargetKind::DaemonSet),
        ("batch", "CronJob") => Some(TargetKind::CronJob),
        _ => None,
    }
}

impl Workload {
    /// Decode an admission payload into the typed form for `kind`.
    pub fn decode(kind: TargetKind, obj: &DynamicObject) -> Result<Self, ClassifyError> {
        fn typed<T: DeserializeOwned>(
            kind: TargetKind,
            obj: &DynamicObject,
        ) -> Result<Box<T>, ClassifyError> {
            serde_json::to_value(obj)
                .and_then(serde_json::from_value)
                .map(Box::new)
                .map_err(|source| ClassifyError::Decode { kind, source })
        }

        match kind {
            TargetKind::Deployment => typed(kind, obj).map(Workload::Deployment),
            TargetKind::StatefulSet => typed(kind, obj).map(Workload::StatefulSet),
            TargetKind::DaemonSet => typed(kind, obj).map(Workload::DaemonSet),
            TargetKind::CronJob => typed(kind, obj).map(Workload::CronJob),
        }
    }

    /// The enforced kind of this workload.
    pub fn kind(&self) -> TargetKind {
        match self {
            Workload::Deployment(_) => TargetKind::Deployment,
            Workload::StatefulSet(_) => TargetKind::StatefulSet,
            Workload::DaemonSet(_) => TargetKind::DaemonSet,
            Workload::CronJob(_) => TargetKind::CronJob,
        }
    }

    /// The workload's labels.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let meta = match self {
            Workload::Deployment(o) => &o.metadata,
            Workload::StatefulSet(o) => &o.metadata,
            Workload::DaemonSet(o) => &o.metadata,
            Workload::CronJob(o) => &o.metadata,
        };
        meta.labels.clone().unwrap_or_default()
    }
}

/// Classify an UPDATE of a workload as ROLL_OUT or SCALE.
///
/// Deployments and StatefulSets: a pod-template change is a ROLL_OUT, a
/// replica-only change is a SCALE, and a no-op update is still a ROLL_OUT
/// (the evaluator allows it unless a rule denies ROLL_OUT). DaemonSets and
/// CronJobs have no replica count, so every update is a ROLL_OUT.
pub fn classify_update(old: &Workload, new: &Workload) -> Result<Action, ClassifyError> {
    match (old, new) {
        (Workload::Deployment(o), Workload::Deployment(n)) => Ok(rollout_or_scale(
            semantic_ne(
                &o.spec.as_ref().map(|s| &s.template),
                &n.spec.as_ref().map(|s| &s.template),
            ),
            o.spec.as_ref().and_then(|s| s.replicas) != n.spec.as_ref().and_then(|s| s.replicas),
        )),
        (Workload::StatefulSet(o), Workload::StatefulSet(n)) => Ok(rollout_or_scale(
            semantic_ne(
                &o.spec.as_ref().map(|s| &s.template),
                &n.spec.as_ref().map(|s| &s.template),
            ),
            o.spec.as_ref().and_then(|s| s.replicas) != n.spec.as_ref().and_then(|s| s.replicas),
        )),
        (Workload::DaemonSet(_), Workload::DaemonSet(_)) => Ok(Action::RollOut),
        (Workload::CronJob(_), Workload::CronJob(_)) => Ok(Action::RollOut),
        (old, new) => Err(ClassifyError::KindMismatch {
            old: old.kind(),
            new: new.kind(),
        }),
    }
}

fn rollout_or_scale(template_changed: bool, replicas_changed: bool) -> Action {
    if template_changed {
        Action::RollOut
    } else if replicas_changed {
        Action::Scale
    } else {
        Action::RollOut
    }
}

/// Semantic inequality: compare serde-normalized values.
fn semantic_ne<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, StatefulSetSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_template(image: &str) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some([("app".to_string(), "web".to_string())].into()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    fn deployment(replicas: i32, image: &str) -> Workload {
        Workload::Deployment(Box::new(Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("prod".to_string()),
                labels: Some([("app".to_string(), "web".to_string())].into()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: pod_template(image),
                ..Default::default()
            }),
            status: None,
        }))
    }

    fn statefulset(replicas: i32, image: &str) -> Workload {
        Workload::StatefulSet(Box::new(StatefulSet {
            metadata: ObjectMeta {
                name: Some("db".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                template: pod_template(image),
                ..Default::default()
            }),
            status: None,
        }))
    }

    #[test]
    fn test_template_change_is_rollout() {
        let action = classify_update(&deployment(3, "web:1"), &deployment(3, "web:2")).unwrap();
        assert_eq!(action, Action::RollOut);
    }

    #[test]
    fn test_replica_change_is_scale() {
        let action = classify_update(&deployment(3, "web:1"), &deployment(5, "web:1")).unwrap();
        assert_eq!(action, Action::Scale);

        let action = classify_update(&statefulset(1, "db:1"), &statefulset(3, "db:1")).unwrap();
        assert_eq!(action, Action::Scale);
    }

    #[test]
    fn test_template_change_wins_over_replicas() {
        // Both changed: the template change dominates.
        let action = classify_update(&deployment(3, "web:1"), &deployment(5, "web:2")).unwrap();
        assert_eq!(action, Action::RollOut);
    }

    #[test]
    fn test_noop_update_is_rollout() {
        let action = classify_update(&deployment(3, "web:1"), &deployment(3, "web:1")).unwrap();
        assert_eq!(action, Action::RollOut);
    }

    #[test]
    fn test_server_assigned_metadata_is_ignored() {
        // The same update arriving with server-populated object metadata
        // (uid, resourceVersion) classifies identically: only spec fields
        // participate in the comparison.
        let old = deployment(3, "web:1");
        let Workload::Deployment(mut boxed) = deployment(3, "web:1") else {
            unreachable!()
        };
        boxed.metadata.uid = Some("abc-123".to_string());
        boxed.metadata.resource_version = Some("42".to_string());
        let new = Workload::Deployment(boxed);

        assert_eq!(classify_update(&old, &new).unwrap(), Action::RollOut);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        // Raw admission payloads carry fields the typed form does not model
        // (status, managedFields); decoding normalizes them away.
        let raw = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "labels": {"app": "web"},
                "managedFields": [{"manager": "kubectl"}]
            },
            "spec": {
                "replicas": 3,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {
                    "metadata": {"labels": {"app": "web"}},
                    "spec": {"containers": [{"name": "app", "image": "web:1"}]}
                }
            },
            "status": {"readyReplicas": 3}
        });
        let obj: DynamicObject = serde_json::from_value(raw).unwrap();
        let workload = Workload::decode(TargetKind::Deployment, &obj).unwrap();
        assert_eq!(workload.kind(), TargetKind::Deployment);
        assert_eq!(workload.labels().get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_daemonset_updates_are_rollout() {
        let ds = |image: &str| {
            Workload::DaemonSet(Box::new(DaemonSet {
                metadata: ObjectMeta::default(),
                spec: Some(k8s_openapi::api::apps::v1::DaemonSetSpec {
                    template: pod_template(image),
                    ..Default::default()
                }),
                status: None,
            }))
        };
        assert_eq!(classify_update(&ds("a:1"), &ds("a:2")).unwrap(), Action::RollOut);
        assert_eq!(classify_update(&ds("a:1"), &ds("a:1")).unwrap(), Action::RollOut);
    }

    #[test]
    fn test_cronjob_updates_are_rollout() {
        let cj = Workload::CronJob(Box::new(CronJob::default()));
        let cj2 = Workload::CronJob(Box::new(CronJob::default()));
        assert_eq!(classify_update(&cj, &cj2).unwrap(), Action::RollOut);
    }

    #[test]
    fn test_kind_mismatch_errors() {
        let err = classify_update(&deployment(1, "a"), &statefulset(1, "a"));
        assert!(matches!(err, Err(ClassifyError::KindMismatch { .. })));
    }

    #[test]
    fn test_map_group_kind() {
        assert_eq!(map_group_kind("apps", "Deployment"), Some(TargetKind::Deployment));
        assert_eq!(map_group_kind("apps", "StatefulSet"), Some(TargetKind::StatefulSet));
        assert_eq!(map_group_kind("apps", "DaemonSet"), Some(TargetKind::DaemonSet));
        assert_eq!(map_group_kind("batch", "CronJob"), Some(TargetKind::CronJob));
        assert_eq!(map_group_kind("", "Pod"), None);
        assert_eq!(map_group_kind("batch", "Job"), None);
    }
}
