//! freeze-operator library crate
//!
//! This module exports the policy CRDs, the decision engine, the admission
//! webhooks, and the controller wiring.

pub mod classify;
pub mod controller;
pub mod crd;
pub mod health;
pub mod policy;
pub mod webhooks;

pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::fmt::Debug;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{Context, change_freeze, freeze_exception, maintenance_window};
use crd::{ChangeFreeze, FreezeException, MaintenanceWindow};

/// Create the default watcher configuration for all controllers.
///
/// This ensures consistent behavior across all controllers:
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Log one controller result, downgrading expected not-found noise.
fn log_reconcile_result<K>(
    controller: &'static str,
    result: Result<
        (reflector::ObjectRef<K>, kube::runtime::controller::Action),
        kube::runtime::controller::Error<controller::Error, watcher::Error>,
    >,
) where
    K: Resource,
    K::DynamicType: Debug,
{
    match result {
        Ok((obj, _action)) => {
            debug!(controller, object = ?obj, "Reconciled");
        }
        Err(e) => {
            // ObjectNotFound/NotFound errors are expected after deletion when
            // watch events trigger reconciliation for a deleted object.
            let is_not_found = match &e {
                kube::runtime::controller::Error::ObjectNotFound(_) => true,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!(controller, "Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!(controller, "Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run the three policy controllers (cluster-wide).
///
/// Watches ChangeFreeze, MaintenanceWindow, and FreezeException resources
/// and reconciles them until the watch streams end. Can be called from
/// main.rs or spawned as a background task during integration tests.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controllers(client: Client, health_state: Option<Arc<HealthState>>) {
    info!("Starting controllers for freeze policy resources");

    // Mark as ready once we start the controllers
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), health_state));

    // Use consistent watcher configuration across all controllers. The three
    // policy kinds are cluster-scoped, so every Api is Api::all.
    let watcher_config = default_watcher_config();

    let (cf_reader, cf_stream) = create_filtered_stream::<ChangeFreeze>(
        Api::all(client.clone()),
        watcher_config.clone(),
    );
    let change_freezes = Controller::for_stream(cf_stream, cf_reader)
        .run(
            change_freeze::reconcile,
            change_freeze::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move { log_reconcile_result("changefreeze", result) });

    let (mw_reader, mw_stream) = create_filtered_stream::<MaintenanceWindow>(
        Api::all(client.clone()),
        watcher_config.clone(),
    );
    let maintenance_windows = Controller::for_stream(mw_stream, mw_reader)
        .run(
            maintenance_window::reconcile,
            maintenance_window::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move { log_reconcile_result("maintenancewindow", result) });

    let (ex_reader, ex_stream) =
        create_filtered_stream::<FreezeException>(Api::all(client.clone()), watcher_config);
    let freeze_exceptions = Controller::for_stream(ex_stream, ex_reader)
        .run(
            freeze_exception::reconcile,
            freeze_exception::error_policy,
            ctx,
        )
        .for_each(|result| async move { log_reconcile_result("freezeexception", result) });

    futures::join!(change_freezes, maintenance_windows, freeze_exceptions);

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
