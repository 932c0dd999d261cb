//! # Types
//!
//! Core types for the reconciler.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::bom::{Bom, BomError, VersionCatalog};
use crate::config::ControllerConfig;
use crate::controller::status_updater::{StatusUpdater, UpdaterError};
use crate::crd::Stack;
use crate::profile::{EffectiveStateResolver, ProfileError};
use crate::registry::{OverridesError, Registry, RegistryError};
use crate::store::{StoreError, Stores};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("failed to decode Stack: {0}")]
    Decode(String),
    #[error("no version for component '{0}' in the bundled manifest")]
    MissingVersion(String),
    #[error("invalid overrides: {0}")]
    ConflictingOverrides(#[from] OverridesError),
    #[error("component '{component}' references {kind} '{name}' which does not exist")]
    MissingOverrideSource {
        component: String,
        kind: &'static str,
        name: String,
    },
    #[error("component '{component}' requires secret {namespace}/{secret}")]
    Prerequisite {
        component: String,
        namespace: String,
        secret: String,
    },
    #[error("hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },
    #[error("component registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("version error: {0}")]
    Version(#[from] BomError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("effective state could not be computed: {0}")]
    Profile(#[from] ProfileError),
    #[error("status update failed: {0}")]
    Updater(#[from] UpdaterError),
}

impl ReconcilerError {
    /// Component named by a rule the user has to fix in the Stack or the
    /// bundled manifest; `None` for transient failures
    #[must_use]
    pub fn rejected_component(&self) -> Option<&str> {
        match self {
            ReconcilerError::MissingVersion(name)
            | ReconcilerError::ConflictingOverrides(
                OverridesError::Conflicting(name) | OverridesError::Legacy { component: name, .. },
            ) => Some(name),
            _ => None,
        }
    }
}

/// Outcome of one reconcile call
#[derive(Debug)]
pub enum ReconcileResult {
    /// Nothing left to do until the Stack changes
    Done,
    /// Not finished yet; look again after the delay
    Requeue(Duration),
    /// A step failed; look again after the delay
    RequeueWithError(Duration, ReconcilerError),
}

impl ReconcileResult {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, ReconcileResult::Done)
    }

    /// Short label used for the requeue metric
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileResult::Done => "done",
            ReconcileResult::Requeue(_) => "pending",
            ReconcileResult::RequeueWithError(..) => "error",
        }
    }
}

/// Extra work run once every component has converged
#[async_trait]
pub trait ExtensionHook: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// After an install or update
    async fn post_install(&self, stores: &Stores, effective: &Stack) -> Result<(), String>;

    /// After an upgrade; the install step by default
    async fn post_upgrade(&self, stores: &Stores, effective: &Stack) -> Result<(), String> {
        self.post_install(stores, effective).await
    }
}

/// Everything a reconcile needs; shared by every reconcile and the observer
#[derive(Clone)]
pub struct Reconciler {
    pub stores: Stores,
    pub registry: Arc<Registry>,
    pub resolver: Arc<dyn EffectiveStateResolver>,
    pub catalog: Arc<dyn VersionCatalog>,
    /// Platform version of the bundled manifest
    pub bom_version: String,
    pub updater: StatusUpdater,
    pub config: ControllerConfig,
    pub hooks: Vec<Arc<dyn ExtensionHook>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("bom_version", &self.bom_version)
            .field("components", &self.registry.len())
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        stores: Stores,
        registry: Arc<Registry>,
        resolver: Arc<dyn EffectiveStateResolver>,
        bom: Bom,
        updater: StatusUpdater,
        config: ControllerConfig,
    ) -> Self {
        let bom_version = bom.version.clone();
        Self {
            stores,
            registry,
            resolver,
            catalog: Arc::new(bom),
            bom_version,
            updater,
            config,
            hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn ExtensionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub(crate) fn short_requeue(&self) -> ReconcileResult {
        ReconcileResult::Requeue(self.config.short_requeue_duration())
    }

    pub(crate) fn requeue_with(&self, error: ReconcilerError) -> ReconcileResult {
        ReconcileResult::RequeueWithError(self.config.short_requeue_duration(), error)
    }
}
