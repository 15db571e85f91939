//! Controllers for the freeze-operator policy kinds.
//!
//! One reconciler per kind keeps each policy's observed state current and
//! re-queues at the next state transition. The CronJob suspension driver is
//! shared by the two deny-producing kinds.

pub mod change_freeze;
pub mod context;
pub mod cronjobs;
pub mod error;
pub mod freeze_exception;
pub mod maintenance_window;

pub use context::Context;
pub use error::Error;

use std::time::Duration;

/// Condition types written on every policy kind.
pub(crate) const CONDITION_READY: &str = "Ready";
pub(crate) const CONDITION_ACTIVE: &str = "Active";

/// Condition/event reasons.
pub(crate) const REASON_EVALUATED: &str = "Evaluated";
pub(crate) const REASON_EVALUATION_FAILED: &str = "EvaluationFailed";
pub(crate) const REASON_ACTIVATED: &str = "Activated";
pub(crate) const REASON_DEACTIVATED: &str = "Deactivated";
pub(crate) const REASON_CRONJOBS_UPDATED: &str = "CronJobsUpdated";
pub(crate) const REASON_CRONJOB_UPDATE_FAILED: &str = "CronJobUpdateFailed";

/// Coarse requeue once a policy's interval has fully elapsed.
pub(crate) const DEFAULT_REQUEUE: Duration = Duration::from_secs(600);

/// Slack added to boundary requeues to land strictly past the transition.
pub(crate) const REQUEUE_SLACK: Duration = Duration::from_secs(1);
