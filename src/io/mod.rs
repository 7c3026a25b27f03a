//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `signal` - JSONL proximity signal records (platform codes translated here)
//! - `trigger_log` - Delivered triggers output to file (JSONL format)

pub mod signal;
pub mod trigger_log;

// Re-export commonly used types
pub use signal::{parse_signal_line, SignalError, SignalReader};
pub use trigger_log::TriggerLog;
