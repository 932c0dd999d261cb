//! # Error Policy
//!
//! Error handling for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Stack;
use crate::observability::metrics;

/// Requeue a Stack whose reconcile surfaced an error to the runtime
pub fn handle_reconciliation_error(obj: Arc<Stack>, error: &ReconcilerError, ctx: Arc<Reconciler>) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    metrics::increment_reconciliation_errors();
    metrics::increment_requeues_total("error");

    let delay = ctx.config.reconciliation_error_requeue_duration();
    warn!("🔄 Retrying {}/{} in {}s", namespace, name, delay.as_secs());
    Action::requeue(delay)
}

/// How a watch stream error should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    NotFound,
    Unauthorized,
    Expired,
    Throttled,
    Other,
}

/// Classify a watch error by its rendered text.
/// 404 is checked before 401 since a 404 body can carry "WatchFailed" text.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Handle a watch stream error.
///
/// Returns `None` to filter the error out (the stream restarts) or `Some(())`
/// to keep going.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify the operator ClusterRole and ClusterRoleBinding still exist");
            error!("   2. Verify the ServiceAccount still exists in the operator namespace");
            error!("   3. Check permissions: kubectl auth can-i list stacks.platform.stackops.io --all-namespaces");
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
            None
        }
        WatchErrorKind::Throttled => {
            let current = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current
            );
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - normal if it was deleted or a CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
