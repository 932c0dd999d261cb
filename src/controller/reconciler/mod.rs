//! # Reconciler
//!
//! Core reconciliation logic for `Stack` resources.
//!
//! The reconciler:
//! - Attaches the finalizer and seeds per-component status
//! - Holds all component work while a newer bundled version waits for an
//!   explicit `spec.version` bump
//! - Creates, updates and deletes one `Module` per component, in dependency order
//! - Propagates user overrides into each component's namespace
//! - Tracks aggregate and per-component status through the status updater
//! - Tears everything down when the Stack is deleted
//!
//! ## Reconciliation Flow
//!
//! 1. Bookkeeping (finalizer, status seeding)
//! 2. Upgrade gate
//! 3. Effective state from the profile resolver
//! 4. Pre-work hooks
//! 5. Module create/update and delete passes
//! 6. Convergence check
//! 7. Post-work hooks
//! 8. Completion status

pub mod hooks;
pub mod init;
pub mod modules;
pub mod overrides;
pub mod reconcile;
pub mod status;
pub mod types;
pub mod uninstall;
pub mod upgrade;

pub use reconcile::{reconcile, reconcile_raw};
pub use types::{ExtensionHook, ReconcileResult, Reconciler, ReconcilerError};
