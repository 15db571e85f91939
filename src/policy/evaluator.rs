//! The policy decision engine.
//!
//! Given a normalized admission input, enumerates deny candidates across the
//! two deny-producing policy kinds, picks a deterministic winner, applies
//! any matching exception override, and returns a `Decision`.
//!
//! Availability bias: a malformed policy (bad selector, bad window, unknown
//! mode) becomes a non-match for that policy instead of an error, so a
//! single broken object never denies all changes. Only cluster lookup
//! failures propagate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::crd::{
    Action, ChangeFreeze, FreezeException, FreezeExceptionConstraintsSpec, MaintenanceWindow,
    TargetKind, TargetSpec, MODE_DENY_OUTSIDE_WINDOWS,
};
use crate::policy::selectors::selector_matches;
use crate::policy::store::{ClusterStore, StoreError};
use crate::policy::types::{Decision, Input, PolicyKind, PolicyRef};
use crate::policy::windows::eval_cron_window;

/// Failures the engine propagates; everything else degrades to a non-match.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The input named no namespace and carried no labels.
    #[error("namespace is required for evaluation")]
    NamespaceRequired,

    /// The target namespace does not exist.
    #[error("namespace {0:?} not found")]
    NamespaceNotFound(String),

    /// Reading the target namespace failed.
    #[error("get namespace {name:?}: {source}")]
    NamespaceLookup {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Listing one of the policy kinds failed.
    #[error("list {kind}: {source}")]
    PolicyList {
        kind: PolicyKind,
        #[source]
        source: StoreError,
    },
}

/// One policy's applicable deny for the current request.
#[derive(Clone, Debug)]
struct DenyCandidate {
    policy: PolicyRef,
    reason: String,
    next_allowed: Option<DateTime<Utc>>,
    freeze_end: Option<DateTime<Utc>>,
}

/// The two deny-producing policy kinds, differing only in their "when"
/// predicate.
enum DenyPolicy<'a> {
    OneShot(&'a ChangeFreeze),
    Recurring(&'a MaintenanceWindow),
}

/// When a deny policy applies: the earliest time the action becomes allowed
/// again, and (for one-shot freezes) the freeze end.
struct DenyWindow {
    next_allowed: Option<DateTime<Utc>>,
    freeze_end: Option<DateTime<Utc>>,
}

impl DenyPolicy<'_> {
    fn target(&self) -> &TargetSpec {
        match self {
            DenyPolicy::OneShot(cf) => &cf.spec.target,
            DenyPolicy::Recurring(mw) => &mw.spec.target,
        }
    }

    fn deny_actions(&self) -> &[Action] {
        match self {
            DenyPolicy::OneShot(cf) => &cf.spec.rules.deny,
            DenyPolicy::Recurring(mw) => &mw.spec.rules.deny,
        }
    }

    fn policy_ref(&self) -> PolicyRef {
        let (kind, meta) = match self {
            DenyPolicy::OneShot(cf) => (PolicyKind::ChangeFreeze, &cf.metadata),
            DenyPolicy::Recurring(mw) => (PolicyKind::MaintenanceWindow, &mw.metadata),
        };
        PolicyRef {
            kind,
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    fn deny_reason(&self) -> String {
        let (reason, fallback) = match self {
            DenyPolicy::OneShot(cf) => (&cf.spec.message.reason, "ChangeFreeze is active"),
            DenyPolicy::Recurring(mw) => (&mw.spec.message.reason, "Outside maintenance window"),
        };
        if reason.is_empty() {
            fallback.to_string()
        } else {
            reason.clone()
        }
    }

    /// Whether this policy denies at `now`, and until when.
    ///
    /// Recurring policies in an unknown mode and windows that fail to
    /// evaluate are skipped; the reconciler surfaces those on status.
    fn deny_at(&self, now: DateTime<Utc>) -> Option<DenyWindow> {
        match self {
            DenyPolicy::OneShot(cf) => {
                if !cf.spec.contains(now) {
                    return None;
                }
                Some(DenyWindow {
                    next_allowed: Some(cf.spec.end_time),
                    freeze_end: Some(cf.spec.end_time),
                })
            }
            DenyPolicy::Recurring(mw) => {
                if mw.spec.mode != MODE_DENY_OUTSIDE_WINDOWS {
                    debug!(
                        policy = %self.policy_ref(),
                        mode = %mw.spec.mode,
                        "Skipping maintenance window with unsupported mode"
                    );
                    return None;
                }
                let mut earliest_next: Option<DateTime<Utc>> = None;
                for window in &mw.spec.windows {
                    match eval_cron_window(now, &mw.spec.timezone, &window.schedule, &window.duration)
                    {
                        Ok(res) if res.active => return None,
                        Ok(res) => {
                            if let Some(next) = res.next_start {
                                if earliest_next.is_none_or(|best| next < best) {
                                    earliest_next = Some(next);
                                }
                            }
                        }
                        Err(e) => {
                            debug!(
                                policy = %self.policy_ref(),
                                window = %window.name,
                                error = %e,
                                "Skipping window that failed to evaluate"
                            );
                        }
                    }
                }
                Some(DenyWindow {
                    next_allowed: earliest_next,
                    freeze_end: None,
                })
            }
        }
    }
}

/// Deterministic winner ordering: earliest `next_allowed` first, candidates
/// without one last, policy name as the tie-breaker.
fn candidate_order(a: &DenyCandidate, b: &DenyCandidate) -> Ordering {
    match (a.next_allowed, b.next_allowed) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.policy.name.cmp(&b.policy.name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.policy.name.cmp(&b.policy.name),
    }
}

/// Whether a policy's target covers the request. Selector errors count as
/// non-matches.
fn target_matches(
    target: &TargetSpec,
    ns_labels: &BTreeMap<String, String>,
    object_labels: &BTreeMap<String, String>,
    kind: TargetKind,
) -> bool {
    if !target.kinds.contains(&kind) {
        return false;
    }
    match selector_matches(target.namespace_selector.as_ref(), ns_labels) {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            debug!(error = %e, "Treating invalid namespace selector as non-matching");
            return false;
        }
    }
    match selector_matches(target.object_selector.as_ref(), object_labels) {
        Ok(matched) => matched,
        Err(e) => {
            debug!(error = %e, "Treating invalid object selector as non-matching");
            false
        }
    }
}

/// Whether an exception's constraints pass for this request.
fn constraints_pass(
    constraints: Option<&FreezeExceptionConstraintsSpec>,
    object_labels: &BTreeMap<String, String>,
    username: &str,
    groups: &[String],
) -> bool {
    let Some(constraints) = constraints else {
        return true;
    };
    for (key, value) in &constraints.require_labels {
        if object_labels.get(key) != Some(value) {
            return false;
        }
    }
    if !constraints.allowed_users.is_empty()
        && !constraints.allowed_users.iter().any(|u| u == username)
    {
        return false;
    }
    if !constraints.allowed_groups.is_empty()
        && !constraints
            .allowed_groups
            .iter()
            .any(|wanted| groups.iter().any(|g| g == wanted))
    {
        return false;
    }
    true
}

/// Whether an exception grants an override for this request at `now`.
fn exception_grants(
    exception: &FreezeException,
    ns_labels: &BTreeMap<String, String>,
    input: &Input,
    now: DateTime<Utc>,
) -> bool {
    target_matches(
        &exception.spec.target,
        ns_labels,
        &input.object_labels,
        input.kind,
    ) && exception.spec.allow.contains(&input.action)
        && exception.spec.contains(now)
        && constraints_pass(
            exception.spec.constraints.as_ref(),
            &input.object_labels,
            &input.username,
            &input.groups,
        )
}

/// Evaluates admission inputs against all policies in the store.
pub struct Evaluator<'a, S: ClusterStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ClusterStore + ?Sized> Evaluator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Evaluate one request to an allow/deny decision.
    pub async fn evaluate(&self, input: Input) -> Result<Decision, EvalError> {
        let now = input.now.unwrap_or_else(Utc::now);
        let ns_labels = match &input.namespace_labels {
            Some(labels) => labels.clone(),
            None => self.lookup_namespace_labels(&input.namespace).await?,
        };

        let mut decision = Decision {
            allowed: true,
            matched_policy: None,
            matched_override: None,
            reason: String::new(),
            next_allowed_time: None,
            freeze_end_time: None,
            evaluation_time: now,
            namespace: input.namespace.clone(),
            kind: input.kind,
            action: input.action,
        };

        let freezes = self.store.change_freezes().await.map_err(|source| {
            EvalError::PolicyList {
                kind: PolicyKind::ChangeFreeze,
                source,
            }
        })?;
        let windows = self.store.maintenance_windows().await.map_err(|source| {
            EvalError::PolicyList {
                kind: PolicyKind::MaintenanceWindow,
                source,
            }
        })?;

        let mut candidates = Vec::new();
        let policies = freezes
            .iter()
            .map(DenyPolicy::OneShot)
            .chain(windows.iter().map(DenyPolicy::Recurring));
        for policy in policies {
            if !target_matches(policy.target(), &ns_labels, &input.object_labels, input.kind) {
                continue;
            }
            if !policy.deny_actions().contains(&input.action) {
                continue;
            }
            let Some(window) = policy.deny_at(now) else {
                continue;
            };
            candidates.push(DenyCandidate {
                policy: policy.policy_ref(),
                reason: policy.deny_reason(),
                next_allowed: window.next_allowed,
                freeze_end: window.freeze_end,
            });
        }

        let Some(chosen) = candidates.into_iter().min_by(candidate_order) else {
            return Ok(decision);
        };

        let exceptions = self.store.freeze_exceptions().await.map_err(|source| {
            EvalError::PolicyList {
                kind: PolicyKind::FreezeException,
                source,
            }
        })?;
        let granted = exceptions
            .iter()
            .find(|ex| exception_grants(ex, &ns_labels, &input, now));

        decision.matched_policy = Some(chosen.policy);
        decision.next_allowed_time = chosen.next_allowed;
        decision.freeze_end_time = chosen.freeze_end;
        match granted {
            Some(exception) => {
                decision.allowed = true;
                decision.matched_override = Some(PolicyRef {
                    kind: PolicyKind::FreezeException,
                    name: exception.metadata.name.clone().unwrap_or_default(),
                });
                decision.reason = "Exception granted".to_string();
            }
            None => {
                decision.allowed = false;
                decision.reason = chosen.reason;
            }
        }
        Ok(decision)
    }

    async fn lookup_namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, EvalError> {
        if namespace.is_empty() {
            return Err(EvalError::NamespaceRequired);
        }
        self.store
            .namespace_labels(namespace)
            .await
            .map_err(|source| EvalError::NamespaceLookup {
                name: namespace.to_string(),
                source,
            })?
            .ok_or_else(|| EvalError::NamespaceNotFound(namespace.to_string()))
    }
}
