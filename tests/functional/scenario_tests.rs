//! End-to-end decision scenarios against the in-memory store.

use chrono::{DateTime, TimeZone, Utc};

use freeze_operator::crd::{Action, TargetKind};
use freeze_operator::policy::{EvalError, Evaluator, Input, PolicyKind};

use crate::mock_store::{
    MockStore, change_freeze, freeze_exception, maintenance_window, prod_target,
};

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn rollout_input(now: DateTime<Utc>) -> Input {
    Input {
        now: Some(now),
        namespace: "prod".to_string(),
        namespace_labels: None,
        kind: TargetKind::Deployment,
        action: Action::RollOut,
        object_labels: [("app".to_string(), "x".to_string())].into(),
        username: "dev".to_string(),
        groups: vec!["system:authenticated".to_string()],
    }
}

fn prod_store() -> MockStore {
    MockStore::default().with_namespace("prod", &[("env", "prod")])
}

#[tokio::test]
async fn freeze_denies_rollout() {
    let mut store = prod_store();
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();

    assert!(!decision.allowed);
    let policy = decision.matched_policy.unwrap();
    assert_eq!(policy.kind, PolicyKind::ChangeFreeze);
    assert_eq!(policy.name, "cf");
    assert_eq!(decision.reason, "freeze");
    assert_eq!(decision.next_allowed_time, Some(at(2026, 1, 28, 13, 0)));
    assert_eq!(decision.freeze_end_time, Some(at(2026, 1, 28, 13, 0)));
    assert!(decision.matched_override.is_none());
}

#[tokio::test]
async fn exception_overrides_freeze() {
    let mut store = prod_store();
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));
    store.exceptions.push(freeze_exception(
        "ex",
        at(2026, 1, 28, 11, 59),
        at(2026, 1, 28, 12, 1),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "hotfix",
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.matched_policy.unwrap().name, "cf");
    let granted = decision.matched_override.unwrap();
    assert_eq!(granted.kind, PolicyKind::FreezeException);
    assert_eq!(granted.name, "ex");
    // The override preserves the winning deny's boundary times.
    assert_eq!(decision.next_allowed_time, Some(at(2026, 1, 28, 13, 0)));

    // One minute later the exception has expired and the deny is back.
    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 2)))
        .await
        .unwrap();
    assert!(!decision.allowed);
}

#[tokio::test]
async fn outside_maintenance_window_denies() {
    let mut store = prod_store();
    store.windows.push(maintenance_window(
        "mw",
        "UTC",
        vec![("nightly", "0 0 * * *", "1h")],
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();

    assert!(!decision.allowed);
    let policy = decision.matched_policy.unwrap();
    assert_eq!(policy.kind, PolicyKind::MaintenanceWindow);
    assert_eq!(policy.name, "mw");
    assert_eq!(decision.next_allowed_time, Some(at(2026, 1, 29, 0, 0)));
    assert_eq!(decision.freeze_end_time, None);
}

#[tokio::test]
async fn inside_maintenance_window_allows() {
    let mut store = prod_store();
    store.windows.push(maintenance_window(
        "mw",
        "UTC",
        vec![("nightly", "0 0 * * *", "1h")],
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 0, 30)))
        .await
        .unwrap();

    assert!(decision.allowed);
    assert!(decision.matched_policy.is_none());
}

#[tokio::test]
async fn scale_denied_only_when_rule_lists_scale() {
    let mut store = prod_store();
    store.freezes.push(change_freeze(
        "scale-freeze",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::Scale],
        "no scaling",
    ));

    let scale_input = Input {
        action: Action::Scale,
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(scale_input).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.matched_policy.unwrap().name, "scale-freeze");

    // The same freeze does not deny a rollout.
    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn no_matching_policy_allows() {
    let mut store = prod_store().with_namespace("staging", &[("env", "staging")]);
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));

    // Wrong namespace labels: target does not match.
    let staging = Input {
        namespace: "staging".to_string(),
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(staging).await.unwrap();
    assert!(decision.allowed);
    assert!(decision.matched_policy.is_none());

    // Wrong kind: target does not match.
    let daemonset = Input {
        kind: TargetKind::DaemonSet,
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(daemonset).await.unwrap();
    assert!(decision.allowed);

    // Outside the interval: the freeze does not deny.
    let after = rollout_input(at(2026, 1, 28, 14, 0));
    let decision = Evaluator::new(&store).evaluate(after).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn winner_is_deterministic_across_policies() {
    let mut store = prod_store();
    // Freeze ending later than the maintenance window's next opening.
    store.freezes.push(change_freeze(
        "late-freeze",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 30, 0, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));
    store.windows.push(maintenance_window(
        "mw",
        "UTC",
        vec![("nightly", "0 0 * * *", "1h")],
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();

    // The window reopens at midnight, before the freeze ends: it wins.
    assert!(!decision.allowed);
    assert_eq!(decision.matched_policy.unwrap().name, "mw");
    assert_eq!(decision.next_allowed_time, Some(at(2026, 1, 29, 0, 0)));
}

#[tokio::test]
async fn equal_next_allowed_ties_break_on_name() {
    let mut store = prod_store();
    for name in ["zulu", "alpha"] {
        store.freezes.push(change_freeze(
            name,
            at(2026, 1, 28, 11, 0),
            at(2026, 1, 28, 13, 0),
            prod_target(vec![TargetKind::Deployment]),
            vec![Action::RollOut],
            "freeze",
        ));
    }

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();
    assert_eq!(decision.matched_policy.unwrap().name, "alpha");
}

#[tokio::test]
async fn unknown_mode_is_skipped() {
    let mut store = prod_store();
    let mut mw = maintenance_window(
        "mw",
        "UTC",
        vec![("nightly", "0 0 * * *", "1h")],
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
    );
    mw.spec.mode = "AllowOutsideWindows".to_string();
    store.windows.push(mw);

    // Outside the window, but the unsupported mode never contributes a deny.
    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn broken_policy_does_not_shadow_decisions() {
    let mut store = prod_store();
    // A window with an unparseable schedule: its policy still denies outside
    // the remaining (zero) windows, with no next-allowed time derivable.
    let mut broken = maintenance_window(
        "broken",
        "UTC",
        vec![("bad", "not a schedule", "1h")],
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
    );
    broken.spec.timezone = "Mars/Olympus".to_string();
    store.windows.push(broken);
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();

    // The well-formed freeze wins deterministically (bounded next-allowed
    // sorts before the broken policy's unbounded deny).
    assert!(!decision.allowed);
    assert_eq!(decision.matched_policy.unwrap().name, "cf");
    assert_eq!(decision.next_allowed_time, Some(at(2026, 1, 28, 13, 0)));
}

#[tokio::test]
async fn missing_namespace_is_an_error() {
    let store = prod_store();
    let input = Input {
        namespace: "ghost".to_string(),
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let err = Evaluator::new(&store).evaluate(input).await;
    assert!(matches!(err, Err(EvalError::NamespaceNotFound(ns)) if ns == "ghost"));
}

#[tokio::test]
async fn supplied_namespace_labels_skip_lookup() {
    // The namespace is not in the store, but labels are supplied inline.
    let mut store = MockStore::default();
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));

    let input = Input {
        namespace_labels: Some([("env".to_string(), "prod".to_string())].into()),
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(input).await.unwrap();
    assert!(!decision.allowed);
}

#[tokio::test]
async fn list_failures_propagate() {
    let mut store = prod_store();
    store.fail_lists = Some("apiserver unavailable".to_string());

    let err = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await;
    assert!(matches!(err, Err(EvalError::PolicyList { .. })));
}

#[tokio::test]
async fn exception_without_matching_action_does_not_override() {
    let mut store = prod_store();
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));
    // Exception only allows SCALE; the denied action is ROLL_OUT.
    store.exceptions.push(freeze_exception(
        "ex",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::Scale],
        "scaling ok",
    ));

    let decision = Evaluator::new(&store)
        .evaluate(rollout_input(at(2026, 1, 28, 12, 0)))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.matched_override.is_none());
}

#[tokio::test]
async fn constrained_exception_checks_object_labels() {
    use freeze_operator::crd::FreezeExceptionConstraintsSpec;

    let mut store = prod_store();
    store.freezes.push(change_freeze(
        "cf",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "freeze",
    ));
    let mut ex = freeze_exception(
        "ex",
        at(2026, 1, 28, 11, 0),
        at(2026, 1, 28, 13, 0),
        prod_target(vec![TargetKind::Deployment]),
        vec![Action::RollOut],
        "hotfix",
    );
    ex.spec.constraints = Some(FreezeExceptionConstraintsSpec {
        require_labels: [("emergency".to_string(), "true".to_string())].into(),
        allowed_users: vec!["alice".to_string()],
        allowed_groups: Vec::new(),
    });
    store.exceptions.push(ex);

    // Right user, but the object lacks the required label.
    let input = Input {
        username: "alice".to_string(),
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(input).await.unwrap();
    assert!(!decision.allowed);

    // Labeled object with an unlisted user still fails.
    let input = Input {
        object_labels: [("emergency".to_string(), "true".to_string())].into(),
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(input).await.unwrap();
    assert!(!decision.allowed);

    // Labeled object and listed user: the override applies.
    let input = Input {
        username: "alice".to_string(),
        object_labels: [("emergency".to_string(), "true".to_string())].into(),
        ..rollout_input(at(2026, 1, 28, 12, 0))
    };
    let decision = Evaluator::new(&store).evaluate(input).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.matched_override.unwrap().name, "ex");
}
