//! # HTTP Server
//!
//! Metrics and Kubernetes probes for the operator.
//!
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe; 200 only while the server is up, no shutdown
//!   is in progress and the status updater is running
//!
//! The server runs on port 5000 by default (configurable via `METRICS_PORT` environment variable).

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::controller::status_updater::StatusUpdater;
use crate::observability::metrics::REGISTRY;

#[derive(Debug, Default)]
pub struct ServerState {
    /// Set once the listener is bound; cleared when shutdown starts
    pub is_ready: Arc<AtomicBool>,
    /// Attached after the reconciler is built
    updater: OnceLock<StatusUpdater>,
}

/// Why `/readyz` refuses traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    ShuttingDown,
    UpdaterMissing,
    UpdaterStopped,
}

impl NotReady {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NotReady::ShuttingDown => "server not serving or shutting down",
            NotReady::UpdaterMissing => "status updater not attached yet",
            NotReady::UpdaterStopped => "status updater is not running",
        }
    }
}

impl ServerState {
    /// Hand the status updater to the readiness probe. Only the first call has an effect.
    pub fn attach_updater(&self, updater: StatusUpdater) {
        if self.updater.set(updater).is_err() {
            error!("Status updater attached to the server twice; keeping the first");
        }
    }

    pub fn readiness(&self) -> Result<(), NotReady> {
        if !self.is_ready.load(Ordering::Relaxed) {
            return Err(NotReady::ShuttingDown);
        }
        match self.updater.get() {
            None => Err(NotReady::UpdaterMissing),
            Some(updater) if !updater.is_running() => Err(NotReady::UpdaterStopped),
            Some(_) => Ok(()),
        }
    }
}

#[must_use]
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind, mark the listener up, and serve until the process exits
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let app = router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);
    state.is_ready.store(true, Ordering::Relaxed);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.readiness() {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(reason) => (StatusCode::SERVICE_UNAVAILABLE, reason.as_str()),
    }
}
