//! Runtime errors recorded as Error tracking events
//!
//! None of these are ever returned to the signal source; they are turned
//! into `TrackingEvent`s and routed to the debug channel.

use crate::domain::types::{BeaconId, RegionId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("unknown region signal: {region_id}")]
    UnknownRegionSignal { region_id: RegionId },

    #[error("unknown beacon signal: {beacon_id} in region {region_id}")]
    UnknownBeaconSignal { region_id: RegionId, beacon_id: BeaconId },

    #[error("trigger buffer overflow: dropped oldest trigger for region {region_id}")]
    TriggerBufferOverflow { region_id: RegionId, capacity: usize },

    #[error("tracking overflow: dropped oldest tracking event")]
    TrackingBufferOverflow { capacity: usize },

    #[error("debug buffer overflow: dropped oldest debug payload")]
    DebugBufferOverflow { capacity: usize },
}

impl RuntimeError {
    /// Stable machine-readable name, used as the `error` field of the payload
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::UnknownRegionSignal { .. } => "unknown_region_signal",
            RuntimeError::UnknownBeaconSignal { .. } => "unknown_beacon_signal",
            RuntimeError::TriggerBufferOverflow { .. } => "trigger_buffer_overflow",
            RuntimeError::TrackingBufferOverflow { .. } => "tracking_buffer_overflow",
            RuntimeError::DebugBufferOverflow { .. } => "debug_buffer_overflow",
        }
    }

    /// JSON payload carried by the Error tracking event
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        match self {
            RuntimeError::UnknownRegionSignal { region_id } => {
                payload["regionId"] = region_id.as_str().into();
            }
            RuntimeError::UnknownBeaconSignal { region_id, beacon_id } => {
                payload["regionId"] = region_id.as_str().into();
                payload["beaconId"] = beacon_id.as_str().into();
            }
            RuntimeError::TriggerBufferOverflow { region_id, capacity } => {
                payload["regionId"] = region_id.as_str().into();
                payload["capacity"] = (*capacity).into();
            }
            RuntimeError::TrackingBufferOverflow { capacity }
            | RuntimeError::DebugBufferOverflow { capacity } => {
                payload["capacity"] = (*capacity).into();
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_region_payload() {
        let err = RuntimeError::UnknownRegionSignal { region_id: "R9".into() };
        let payload = err.to_payload();
        assert_eq!(payload["error"], "unknown_region_signal");
        assert_eq!(payload["regionId"], "R9");
        assert_eq!(payload["message"], "unknown region signal: R9");
    }

    #[test]
    fn test_overflow_payload_carries_capacity() {
        let err = RuntimeError::TrackingBufferOverflow { capacity: 4 };
        assert_eq!(err.kind(), "tracking_buffer_overflow");
        assert_eq!(err.to_payload()["capacity"], 4);

        let err = RuntimeError::DebugBufferOverflow { capacity: 8 };
        assert_eq!(err.kind(), "debug_buffer_overflow");
        assert_eq!(err.to_payload()["capacity"], 8);
    }
}
