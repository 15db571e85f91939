//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels identifying one policy object.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PolicyLabels {
    pub policy_type: String,
    pub policy_name: String,
}

impl EncodeLabelSet for PolicyLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("policy_type", self.policy_type.as_str()).encode(encoder.encode_label())?;
        ("policy_name", self.policy_name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for denied admission requests.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DeniedLabels {
    pub policy_type: String,
    pub policy_name: String,
    pub namespace: String,
    pub kind: String,
    pub action: String,
}

impl EncodeLabelSet for DeniedLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("policy_type", self.policy_type.as_str()).encode(encoder.encode_label())?;
        ("policy_name", self.policy_name.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("action", self.action.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for allowed admission requests.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AllowedLabels {
    pub namespace: String,
    pub kind: String,
    pub action: String,
}

impl EncodeLabelSet for AllowedLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("action", self.action.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for exception overrides.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OverrideLabels {
    pub exception_name: String,
    pub policy_type: String,
    pub policy_name: String,
}

impl EncodeLabelSet for OverrideLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("exception_name", self.exception_name.as_str()).encode(encoder.encode_label())?;
        ("policy_type", self.policy_type.as_str()).encode(encoder.encode_label())?;
        ("policy_name", self.policy_name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reconciliation durations.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ControllerLabels {
    pub controller: String,
}

impl EncodeLabelSet for ControllerLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("controller", self.controller.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for CronJob suspension counts.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SuspensionLabels {
    pub policy_type: String,
    pub policy_name: String,
    pub namespace: String,
}

impl EncodeLabelSet for SuspensionLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("policy_type", self.policy_type.as_str()).encode(encoder.encode_label())?;
        ("policy_name", self.policy_name.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// 1 when a policy is enforcing, 0 otherwise
    pub active_policies: Family<PolicyLabels, Gauge>,
    /// Denied admission requests
    pub denied_requests: Family<DeniedLabels, Counter>,
    /// Allowed admission requests
    pub allowed_requests: Family<AllowedLabels, Counter>,
    /// Times an exception overrode a deny
    pub exception_overrides: Family<OverrideLabels, Counter>,
    /// Reconciliation duration per controller
    pub reconciliation_duration_seconds: Family<ControllerLabels, Histogram>,
    /// CronJobs currently suspended per policy and namespace
    pub cronjob_suspensions: Family<SuspensionLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let active_policies = Family::<PolicyLabels, Gauge>::default();
        registry.register(
            "active_policies",
            "Whether a policy is currently enforcing (1) or not (0)",
            active_policies.clone(),
        );

        let denied_requests = Family::<DeniedLabels, Counter>::default();
        registry.register(
            "denied_requests",
            "Total number of denied admission requests by policy",
            denied_requests.clone(),
        );

        let allowed_requests = Family::<AllowedLabels, Counter>::default();
        registry.register(
            "allowed_requests",
            "Total number of allowed admission requests",
            allowed_requests.clone(),
        );

        let exception_overrides = Family::<OverrideLabels, Counter>::default();
        registry.register(
            "exception_overrides",
            "Total number of times a FreezeException overrode a deny policy",
            exception_overrides.clone(),
        );

        let reconciliation_duration_seconds =
            Family::<ControllerLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(
                    [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0].into_iter(),
                )
            });
        registry.register(
            "reconciliation_duration_seconds",
            "Duration of controller reconciliation in seconds",
            reconciliation_duration_seconds.clone(),
        );

        let cronjob_suspensions = Family::<SuspensionLabels, Gauge>::default();
        registry.register(
            "cronjob_suspensions_total",
            "Number of CronJobs currently suspended by freeze policies",
            cronjob_suspensions.clone(),
        );

        Self {
            active_policies,
            denied_requests,
            allowed_requests,
            exception_overrides,
            reconciliation_duration_seconds,
            cronjob_suspensions,
            registry,
        }
    }

    /// Set whether a policy is currently enforcing
    pub fn set_policy_active(&self, policy_type: &str, policy_name: &str, active: bool) {
        self.active_policies
            .get_or_create(&PolicyLabels {
                policy_type: policy_type.to_string(),
                policy_name: policy_name.to_string(),
            })
            .set(i64::from(active));
    }

    /// Record a denied admission request
    pub fn record_denied(
        &self,
        policy_type: &str,
        policy_name: &str,
        namespace: &str,
        kind: &str,
        action: &str,
    ) {
        self.denied_requests
            .get_or_create(&DeniedLabels {
                policy_type: policy_type.to_string(),
                policy_name: policy_name.to_string(),
                namespace: namespace.to_string(),
                kind: kind.to_string(),
                action: action.to_string(),
            })
            .inc();
    }

    /// Record an allowed admission request
    pub fn record_allowed(&self, namespace: &str, kind: &str, action: &str) {
        self.allowed_requests
            .get_or_create(&AllowedLabels {
                namespace: namespace.to_string(),
                kind: kind.to_string(),
                action: action.to_string(),
            })
            .inc();
    }

    /// Record an exception overriding a deny
    pub fn record_override(&self, exception_name: &str, policy_type: &str, policy_name: &str) {
        self.exception_overrides
            .get_or_create(&OverrideLabels {
                exception_name: exception_name.to_string(),
                policy_type: policy_type.to_string(),
                policy_name: policy_name.to_string(),
            })
            .inc();
    }

    /// Record a reconciliation duration
    pub fn observe_reconcile(&self, controller: &str, duration_secs: f64) {
        self.reconciliation_duration_seconds
            .get_or_create(&ControllerLabels {
                controller: controller.to_string(),
            })
            .observe(duration_secs);
    }

    /// Set the number of CronJobs a policy currently suspends in a namespace
    pub fn set_cronjob_suspensions(
        &self,
        policy_type: &str,
        policy_name: &str,
        namespace: &str,
        count: i64,
    ) {
        self.cronjob_suspensions
            .get_or_create(&SuspensionLabels {
                policy_type: policy_type.to_string(),
                policy_name: policy_name.to_string(),
                namespace: namespace.to_string(),
            })
            .set(count);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controllers)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
