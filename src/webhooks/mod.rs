//! Admission webhooks.
//!
//! - `workloads`: enforcement of freeze policies on workload mutations
//! - `intake`: shape validation of the policy resources themselves
//! - `server`: the TLS webhook server wiring both up

pub mod intake;
pub mod server;
pub mod workloads;

pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    run_webhook_server,
};
