//! Stack Operator Library
//!
//! Drives a multi-component platform stack through install, upgrade and
//! uninstall by managing one `Module` resource per component.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use stack_operator::prelude::*;
//! ```

pub mod bom;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod merge;
pub mod observability;
pub mod prelude;
pub mod profile;
pub mod registry;
pub mod runtime;
pub mod store;
