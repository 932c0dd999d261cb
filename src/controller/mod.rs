//! # Controller
//!
//! Core controller modules for the stack operator.
//!
//! - `availability`: Periodic Module readiness observer
//! - `crdgen`: CRD generation utility (separate binary)
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `status_updater`: Single-writer queue for Stack status

pub mod availability;
pub mod reconciler;
pub mod server;
pub mod status_updater;
