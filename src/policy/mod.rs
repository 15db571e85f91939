//! Policy decision core: selector matching, cron-window evaluation, the
//! cluster-store seam, and the decision engine itself.

pub mod evaluator;
pub mod selectors;
pub mod store;
pub mod types;
pub mod windows;

pub use evaluator::{EvalError, Evaluator};
pub use store::{ClusterStore, KubeClusterStore, StoreError};
pub use types::{Decision, Input, PolicyKind, PolicyRef};
pub use windows::{eval_cron_window, EvaluatedWindow, WindowError};
