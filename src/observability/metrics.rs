//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `stack_operator_reconciliations_total` - Total number of reconciliations
//! - `stack_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `stack_operator_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `stack_operator_requeues_total` - Requeues by reason
//! - `stack_operator_module_operations_total` - Module creates, updates and deletes
//! - `stack_operator_status_writes_total` - Status writes applied by the status updater
//! - `stack_operator_store_conflicts_total` - Optimistic-concurrency conflicts seen on writes
//! - `stack_operator_status_queue_depth` - Events waiting in the status queue

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "stack_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "stack_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static MODULE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "stack_operator_module_operations_total",
            "Total number of Module writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create MODULE_OPERATIONS_TOTAL metric - this should never happen")
});

static STATUS_WRITES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_operator_status_writes_total",
        "Total number of Stack status writes",
    )
    .expect("Failed to create STATUS_WRITES_TOTAL metric - this should never happen")
});

static STORE_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_operator_store_conflicts_total",
        "Total number of optimistic-concurrency conflicts",
    )
    .expect("Failed to create STORE_CONFLICTS_TOTAL metric - this should never happen")
});

static STATUS_QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "stack_operator_status_queue_depth",
        "Number of status events waiting to be applied",
    )
    .expect("Failed to create STATUS_QUEUE_DEPTH metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails when called twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MODULE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_QUEUE_DEPTH.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

/// `operation` is one of `create`, `update`, `delete`
pub fn increment_module_operations(operation: &str) {
    MODULE_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_status_writes() {
    STATUS_WRITES_TOTAL.inc();
}

pub fn increment_store_conflicts() {
    STORE_CONFLICTS_TOTAL.inc();
}

pub fn inc_status_queue_depth() {
    STATUS_QUEUE_DEPTH.inc();
}

pub fn dec_status_queue_depth() {
    STATUS_QUEUE_DEPTH.dec();
}
