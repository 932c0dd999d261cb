//! # Status Management
//!
//! Condition log rules, per-component state derivation and the convergence
//! check. All writes go through the status updater.

pub mod components;
pub mod conditions;
pub mod convergence;

pub use components::{module_component_state, refresh_component_states};
pub use conditions::{append_condition, upgrade_failures};
pub use convergence::{check_convergence, surface_failures, Convergence};
