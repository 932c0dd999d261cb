//! # Custom Resource Definitions
//!
//! CRD types owned by the operator.
//!
//! ## Module Structure
//!
//! - `stack.rs` - The user-facing `Stack` resource and component settings
//! - `status.rs` - Stack status, conditions and component records
//! - `module.rs` - The per-component `Module` resource
//! - `overrides.rs` - Both override shapes and the unified `OverrideSource`

mod module;
pub mod overrides;
mod stack;
mod status;

pub use module::{
    Module, ModuleCondition, ModuleSpec, ModuleStatus, ValuesFromSource, MODULE_READY,
    MODULE_REASON_FAILED,
};
pub use overrides::{KeyRef, LegacyOverride, LegacyOverrideKind, OverrideSource, Overrides};
pub use stack::{ComponentSpec, Stack, StackSpec};
pub use status::{
    ComponentState, ComponentStatus, Condition, ConditionType, OperationClass, StackState,
    StackStatus,
};

use schemars::{Schema, SchemaGenerator};

/// Schema for free-form values: any object, kept as-is by the API server
pub(crate) fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
