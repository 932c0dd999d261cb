//! # Configuration
//!
//! Operator configuration loaded once at startup from the environment.

mod controller;

pub use controller::ControllerConfig;
