//! # Observability
//!
//! Prometheus metrics for the operator. Logging is plain `tracing`,
//! configured in `runtime::initialization`.

pub mod metrics;

pub use metrics::*;
