//! Infrastructure - configuration and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Validated configuration (TOML loading, builder, defaults)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::{Configuration, ConfigurationBuilder, ConfigurationError, DebugVerbosity};
pub use metrics::{Metrics, MetricsSummary};
