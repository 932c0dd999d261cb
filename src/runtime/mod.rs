//! # Runtime
//!
//! Process wiring around the reconciler: startup, the controller watch loop,
//! secondary watch mappings and the error policy.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
pub mod watches;
