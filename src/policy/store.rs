//! Cluster read access for the decision engine.
//!
//! The engine needs exactly four reads per request: the three policy lists
//! and the target namespace's labels. `ClusterStore` is that seam; the
//! production implementation goes through the Kubernetes API (and benefits
//! from any client-level caching), while the functional tests substitute an
//! in-memory store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, Client};
use thiserror::Error;

use crate::crd::{ChangeFreeze, FreezeException, MaintenanceWindow};

/// A failed cluster read.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error.
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// Injected failure, used by tests.
    #[error("{0}")]
    Fault(String),
}

/// Point-in-time reads of policy objects and namespace labels.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// All ChangeFreeze policies in the cluster.
    async fn change_freezes(&self) -> Result<Vec<ChangeFreeze>, StoreError>;

    /// All MaintenanceWindow policies in the cluster.
    async fn maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, StoreError>;

    /// All FreezeException overrides in the cluster.
    async fn freeze_exceptions(&self) -> Result<Vec<FreezeException>, StoreError>;

    /// Labels of the named namespace, or `None` when it does not exist.
    async fn namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError>;
}

/// `ClusterStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn change_freezes(&self) -> Result<Vec<ChangeFreeze>, StoreError> {
        let api: Api<ChangeFreeze> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, StoreError> {
        let api: Api<MaintenanceWindow> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn freeze_exceptions(&self) -> Result<Vec<FreezeException>, StoreError> {
        let api: Api<FreezeException> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(name)
            .await?
            .map(|ns| ns.metadata.labels.unwrap_or_default()))
    }
}
