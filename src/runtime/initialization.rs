//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup, and loading the bundled component
//! registry, version manifest and profiles.

use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::bom::Bom;
use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, ReconcileResult, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::controller::status_updater::{StatusUpdater, UpdaterSettings};
use crate::crd::Stack;
use crate::observability;
use crate::profile::ProfileResolver;
use crate::registry::Registry;
use crate::store::Stores;

const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Registry, manifest and profile loading
/// - Status updater and reconciler setup
/// - Reconcile existing Stacks
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything touches TLS
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stack_operator=info".into()),
        )
        .init();

    info!("Starting Stack Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let config = ControllerConfig::from_env();

    let server_state = Arc::new(ServerState::default());

    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default().await?;

    let registry = Registry::load(&config.component_registry_path).with_context(|| {
        format!(
            "Failed to load component registry from {}",
            config.component_registry_path.display()
        )
    })?;
    let bom = Bom::from_path(&config.bom_path)
        .with_context(|| format!("Failed to load version manifest from {}", config.bom_path.display()))?;
    let profiles = ProfileResolver::load(&config.profiles_path)
        .with_context(|| format!("Failed to load profiles from {}", config.profiles_path.display()))?;
    info!(
        "Loaded {} components, platform version {}",
        registry.len(),
        bom.version
    );

    let stores = Stores::from_client(&client);
    let updater = StatusUpdater::new(Arc::clone(&stores.stacks), UpdaterSettings::from_config(&config));
    updater.start().context("Failed to start status updater")?;
    server_state.attach_updater(updater.clone());

    let reconciler = Arc::new(Reconciler::new(
        stores,
        Arc::new(registry),
        Arc::new(profiles),
        bom,
        updater,
        config,
    ));

    reconcile_existing_stacks(&Api::<Stack>::all(client.clone()), &reconciler).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > SERVER_STARTUP_TIMEOUT {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                SERVER_STARTUP_TIMEOUT.as_secs()
            ));
        }

        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
}

/// Reconcile existing Stacks once before the watch starts, so a restarted
/// operator picks up where it left off and the startup log shows what it manages.
async fn reconcile_existing_stacks(stacks: &Api<Stack>, reconciler: &Arc<Reconciler>) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.reconcile_existing",
        operation = "reconcile_existing_stacks"
    );
    let _guard = span.enter();

    let list = match stacks.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("Stack CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: crdgen --kind all | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
            return;
        }
    };

    if list.items.is_empty() {
        info!("No existing Stack resources found, watch will pick up new resources");
        return;
    }

    let mut by_namespace: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for item in &list.items {
        by_namespace
            .entry(item.metadata.namespace.as_deref().unwrap_or("default"))
            .or_default()
            .push(item.metadata.name.as_deref().unwrap_or("unknown"));
    }
    info!("Stack Operator - Startup Resource Summary");
    info!("Total Stacks: {}", list.items.len());
    for (namespace, names) in &by_namespace {
        info!("Namespace: {} ({})", namespace, names.join(", "));
    }

    for item in &list.items {
        let name = item.metadata.name.as_deref().unwrap_or("unknown");
        let namespace = item.metadata.namespace.as_deref().unwrap_or("default");
        match reconcile(item, reconciler).await {
            ReconcileResult::RequeueWithError(_, e) => {
                error!("Failed to reconcile existing Stack {}/{}: {}", namespace, name, e);
            }
            result => {
                info!("Reconciled existing Stack {}/{} ({})", namespace, name, result.as_str());
            }
        }
    }
}
