//! # Object Store
//!
//! The orchestration core talks to the cluster only through [`ObjectStore`].
//! `api.rs` implements it on top of `kube::Api`; `memory.rs` is an in-process
//! implementation with the same optimistic-concurrency rules, used by tests
//! and local runs.
//!
//! `retry.rs` holds the single fetch-merge-write loop that every
//! read-modify-write in the operator goes through.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use std::sync::Arc;
use thiserror::Error;

use crate::crd::{Module, Stack};

pub mod api;
pub mod memory;
pub mod retry;

pub use memory::MemoryStore;
pub use retry::{create_or_update, update_with_retry, OperationResult};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },
    /// Optimistic-concurrency token mismatch
    #[error("conflict writing {kind} {key}")]
    Conflict { kind: String, key: String },
    #[error("store request failed: {0}")]
    Api(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed access to one kind of resource
///
/// `namespace` is ignored for cluster-scoped kinds. Writes carry the object's
/// `metadata.resourceVersion`; a stale token yields [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// `Ok(None)` when the object does not exist
    async fn get(&self, namespace: Option<&str>, name: &str) -> StoreResult<Option<K>>;

    /// List objects; `namespace: None` lists across all namespaces.
    /// `label_selector` uses `key=value[,key=value]` equality syntax.
    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> StoreResult<Vec<K>>;

    async fn create(&self, obj: &K) -> StoreResult<K>;

    /// Replace everything except status
    async fn replace(&self, obj: &K) -> StoreResult<K>;

    /// Replace only status
    async fn replace_status(&self, obj: &K) -> StoreResult<K>;

    /// Request deletion. Returns `Ok(false)` when the object was already gone.
    async fn delete(&self, namespace: Option<&str>, name: &str) -> StoreResult<bool>;
}

/// Handles for every kind the operator reads or writes
#[derive(Clone)]
pub struct Stores {
    pub stacks: Arc<dyn ObjectStore<Stack>>,
    pub modules: Arc<dyn ObjectStore<Module>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub namespaces: Arc<dyn ObjectStore<Namespace>>,
    pub jobs: Arc<dyn ObjectStore<Job>>,
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
    pub cluster_roles: Arc<dyn ObjectStore<ClusterRole>>,
    pub cluster_role_bindings: Arc<dyn ObjectStore<ClusterRoleBinding>>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    /// Stores backed by the Kubernetes API
    #[must_use]
    pub fn from_client(client: &kube::Client) -> Self {
        use self::api::ApiStore;
        Self {
            stacks: Arc::new(ApiStore::<Stack>::namespaced(client.clone())),
            modules: Arc::new(ApiStore::<Module>::namespaced(client.clone())),
            secrets: Arc::new(ApiStore::<Secret>::namespaced(client.clone())),
            config_maps: Arc::new(ApiStore::<ConfigMap>::namespaced(client.clone())),
            namespaces: Arc::new(ApiStore::<Namespace>::cluster(client.clone())),
            jobs: Arc::new(ApiStore::<Job>::namespaced(client.clone())),
            deployments: Arc::new(ApiStore::<Deployment>::namespaced(client.clone())),
            cluster_roles: Arc::new(ApiStore::<ClusterRole>::cluster(client.clone())),
            cluster_role_bindings: Arc::new(ApiStore::<ClusterRoleBinding>::cluster(
                client.clone(),
            )),
        }
    }
}

/// Concrete in-memory stores, kept alongside the [`Stores`] view so tests can
/// seed objects and play the Module backend
#[derive(Debug, Clone, Default)]
pub struct MemoryStores {
    pub stacks: Arc<MemoryStore<Stack>>,
    pub modules: Arc<MemoryStore<Module>>,
    pub secrets: Arc<MemoryStore<Secret>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    pub namespaces: Arc<MemoryStore<Namespace>>,
    pub jobs: Arc<MemoryStore<Job>>,
    pub deployments: Arc<MemoryStore<Deployment>>,
    pub cluster_roles: Arc<MemoryStore<ClusterRole>>,
    pub cluster_role_bindings: Arc<MemoryStore<ClusterRoleBinding>>,
}

impl MemoryStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stores(&self) -> Stores {
        Stores {
            stacks: Arc::clone(&self.stacks) as Arc<dyn ObjectStore<Stack>>,
            modules: Arc::clone(&self.modules) as Arc<dyn ObjectStore<Module>>,
            secrets: Arc::clone(&self.secrets) as Arc<dyn ObjectStore<Secret>>,
            config_maps: Arc::clone(&self.config_maps) as Arc<dyn ObjectStore<ConfigMap>>,
            namespaces: Arc::clone(&self.namespaces) as Arc<dyn ObjectStore<Namespace>>,
            jobs: Arc::clone(&self.jobs) as Arc<dyn ObjectStore<Job>>,
            deployments: Arc::clone(&self.deployments) as Arc<dyn ObjectStore<Deployment>>,
            cluster_roles: Arc::clone(&self.cluster_roles) as Arc<dyn ObjectStore<ClusterRole>>,
            cluster_role_bindings: Arc::clone(&self.cluster_role_bindings) as Arc<dyn ObjectStore<ClusterRoleBinding>>,
        }
    }
}
