//! # Watch Loop
//!
//! Controller watch loop that monitors Stack resources, plus the Secrets,
//! ConfigMaps, Modules and Jobs related to them, and triggers reconciliation
//! when changes are detected.

use futures::{FutureExt, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::{reflector, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS};
use crate::controller::reconciler::{reconcile, ReconcileResult, Reconciler, ReconcilerError};
use crate::controller::server::ServerState;
use crate::crd::{Module, Stack};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::runtime::watches::{stack_for_job, stack_from_labels, stacks_referencing};

/// Run the controller watch loop until a shutdown signal arrives.
/// The stream is restarted after it ends or fails.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let shutdown = shutdown_signal(Arc::clone(&server_state)).boxed().shared();

    // Modules are cached so a Job can be traced back through its owning Module
    let (modules, module_writer) = reflector::store::<Module>();
    let module_stream = reflector(
        module_writer,
        watcher(Api::<Module>::all(client.clone()), watcher::Config::default()),
    );
    tokio::spawn(module_stream.for_each(|_| futures::future::ready(())));

    let backoff_ms = Arc::new(AtomicU64::new(DEFAULT_WATCH_BACKOFF_START_MS));
    let restart_delay = reconciler.config.watch_restart_delay_duration();

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(tracing::Level::INFO, "controller.watch", operation = "watch_loop");
        let _watch_guard = watch_span.enter();
        info!("Starting controller watch loop...");

        let controller = Controller::new(
            Api::<Stack>::all(client.clone()),
            watcher::Config::default().any_semantic(),
        );
        let stacks = controller.store();

        let secret_mapper = {
            let stacks = stacks.clone();
            let ctx = Arc::clone(&reconciler);
            move |secret: Secret| {
                stacks_referencing(
                    &stacks.state(),
                    &ctx.registry,
                    ctx.resolver.as_ref(),
                    secret.namespace().as_deref(),
                    &secret.name_any(),
                )
            }
        };
        let config_map_mapper = {
            let stacks = stacks.clone();
            let ctx = Arc::clone(&reconciler);
            move |cm: ConfigMap| {
                stacks_referencing(
                    &stacks.state(),
                    &ctx.registry,
                    ctx.resolver.as_ref(),
                    cm.namespace().as_deref(),
                    &cm.name_any(),
                )
            }
        };
        let job_mapper = {
            let modules = modules.clone();
            move |job: Job| stack_for_job(&job, &modules.state())
        };

        let backoff = Arc::clone(&backoff_ms);
        controller
            .watches(Api::<Secret>::all(client.clone()), watcher::Config::default(), secret_mapper)
            .watches(Api::<ConfigMap>::all(client.clone()), watcher::Config::default(), config_map_mapper)
            .watches(Api::<Module>::all(client.clone()), watcher::Config::default(), |module: Module| {
                stack_from_labels(module.labels())
            })
            .watches(Api::<Job>::all(client.clone()), watcher::Config::default(), job_mapper)
            .graceful_shutdown_on(shutdown.clone())
            .run(reconcile_stack, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match &x {
                        Ok(_) => {
                            backoff.store(DEFAULT_WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                DEFAULT_WATCH_BACKOFF_MAX_MS,
                                restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, after marking the operator not ready.
/// A signal handler that cannot be installed never fires.
async fn shutdown_signal(server_state: Arc<ServerState>) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT, initiating graceful shutdown..."),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
}

/// Map a reconcile outcome onto the runtime's requeue actions
#[must_use]
pub fn to_action(result: ReconcileResult) -> Result<Action, ReconcilerError> {
    match result {
        ReconcileResult::Done => Ok(Action::await_change()),
        ReconcileResult::Requeue(delay) => Ok(Action::requeue(delay)),
        ReconcileResult::RequeueWithError(_, error) => Err(error),
    }
}

async fn reconcile_stack(stack: Arc<Stack>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch.reconcile",
        resource.name = stack.metadata.name.as_deref().unwrap_or("unknown"),
        resource.namespace = stack.metadata.namespace.as_deref().unwrap_or("default"),
        resource.version = stack.metadata.resource_version.as_deref().unwrap_or("unknown"),
        resource.generation = stack.generation(),
        event.r#type = "watch_triggered"
    );
    debug!(parent: &span, "watch.event.received");
    to_action(reconcile(&stack, &ctx).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_to_action() {
        assert_eq!(to_action(ReconcileResult::Done).unwrap(), Action::await_change());
        assert_eq!(
            to_action(ReconcileResult::Requeue(Duration::from_secs(3))).unwrap(),
            Action::requeue(Duration::from_secs(3))
        );
        let err = to_action(ReconcileResult::RequeueWithError(
            Duration::from_secs(3),
            ReconcilerError::MissingVersion("alpha".into()),
        ))
        .unwrap_err();
        assert!(matches!(err, ReconcilerError::MissingVersion(name) if name == "alpha"));
    }
}
