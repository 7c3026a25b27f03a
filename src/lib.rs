//! Beacon gateway library
//!
//! Debounced beacon/region proximity tracking, rule-driven trigger
//! assembly and callback delivery behind a process-wide manager.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;

pub use infra::{Configuration, DebugVerbosity};
pub use services::Manager;
