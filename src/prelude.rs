//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use stack_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile, reconcile_raw, ExtensionHook, ReconcileResult, Reconciler, ReconcilerError,
};
pub use crate::controller::status_updater::{StatusUpdater, UpdateEvent, UpdaterSettings};

// Catalogs loaded at startup
pub use crate::bom::{Bom, VersionCatalog};
pub use crate::profile::{EffectiveStateResolver, ProfileResolver};
pub use crate::registry::{Component, Registry};

// Config and storage
pub use crate::config::ControllerConfig;
pub use crate::store::{MemoryStores, ObjectStore, Stores};
