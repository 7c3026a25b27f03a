//! Trigger log - appends delivered triggers to a JSONL file
//!
//! Each line is one trigger payload exactly as the backend would receive it.

use crate::domain::trigger::TriggerRequest;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

pub struct TriggerLog {
    file_path: String,
}

impl TriggerLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "trigger_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append one trigger; returns true if it was written
    pub fn write_trigger(&self, request: &TriggerRequest) -> bool {
        let json = request.to_json();

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    region_id = request.region_id().unwrap_or_default(),
                    beacon_id = request.beacon_id().unwrap_or_default(),
                    event_type = request.event_type().unwrap_or_default(),
                    "trigger_logged"
                );
                true
            }
            Err(e) => {
                error!(
                    region_id = request.region_id().unwrap_or_default(),
                    error = %e,
                    "trigger_log_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "trigger_log_written");

        Ok(())
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}
