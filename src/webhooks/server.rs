//! Admission webhook server.
//!
//! Provides HTTP endpoints for Kubernetes admission webhooks.
//!
//! To enable webhooks:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create ValidatingWebhookConfigurations for the workload and policy endpoints
//! 3. Mount the TLS certificate secret to the operator pod at /etc/webhook/certs/
//!
//! The webhook server starts automatically when certificates are present.

use std::sync::Arc;

use axum::{Router, routing::post};
use kube::Client;
use tracing::info;

use crate::health::HealthState;
use crate::webhooks::{intake, workloads};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Kubernetes client for namespace, workload, and policy reads
    pub client: Client,
    /// The operator's own namespace; its service accounts bypass enforcement
    pub operator_namespace: String,
    /// Optional health state for admission metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(
        client: Client,
        operator_namespace: String,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            operator_namespace,
            health_state,
        }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate-workloads", post(workloads::validate_workloads))
        .route("/validate-changefreeze", post(intake::validate_change_freeze))
        .route(
            "/validate-maintenancewindow",
            post(intake::validate_maintenance_window),
        )
        .route(
            "/validate-freezeexception",
            post(intake::validate_freeze_exception),
        )
        .with_state(state)
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the enforcement and intake endpoints.
///
/// # Arguments
/// * `client` - Kubernetes client
/// * `operator_namespace` - the operator's namespace, for the self-bypass group
/// * `health_state` - optional metrics sink
/// * `cert_path` - Path to TLS certificate file (PEM format)
/// * `key_path` - Path to TLS private key file (PEM format)
pub async fn run_webhook_server(
    client: Client,
    operator_namespace: String,
    health_state: Option<Arc<HealthState>>,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let state = Arc::new(WebhookState::new(client, operator_namespace, health_state));
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(port = WEBHOOK_PORT, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
