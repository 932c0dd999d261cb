//! # Module Synchronizer
//!
//! Two passes run on every reconcile: [`create_or_update_modules`] brings each
//! enabled component's Module in line with the effective state, then
//! [`delete_modules`] removes the Modules of disabled components. Both keep
//! going past per-component failures and report them together.

mod create_update;
mod delete;

pub use create_update::create_or_update_modules;
pub use delete::delete_modules;

use crate::controller::reconciler::types::ReconcilerError;

/// Result of the create-or-update pass
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Components waiting on something (a dependency, a Module being deleted)
    pub pending: usize,
    /// A Module or one of its propagated copies was written
    pub changed: bool,
    pub errors: Vec<ReconcilerError>,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.pending == 0 && self.errors.is_empty()
    }
}

/// Result of the delete pass
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub candidates: usize,
    pub succeeded: usize,
    pub errors: Vec<ReconcilerError>,
}

impl DeleteOutcome {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.succeeded == self.candidates
    }
}
