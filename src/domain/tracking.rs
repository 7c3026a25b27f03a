//! Analytics tracking events and debug channel payloads

use crate::domain::error::RuntimeError;
use crate::domain::types::{epoch_ms, new_uuid_v7};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of tracking event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingEventType {
    Present,
    Action,
    Error,
}

impl TrackingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingEventType::Present => "present",
            TrackingEventType::Action => "action",
            TrackingEventType::Error => "error",
        }
    }
}

impl fmt::Display for TrackingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingEvent {
    /// UUIDv7, time-sortable
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: TrackingEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub timestamp_ms: u64,
}

impl TrackingEvent {
    pub fn new(event_type: TrackingEventType, payload: Option<serde_json::Value>) -> Self {
        Self { id: new_uuid_v7(), event_type, payload, timestamp_ms: epoch_ms() }
    }

    pub fn error(err: &RuntimeError) -> Self {
        Self::new(TrackingEventType::Error, Some(err.to_payload()))
    }

    pub fn is_error(&self) -> bool {
        self.event_type == TrackingEventType::Error
    }
}

/// What the debug handler receives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum DebugPayload {
    Tracking(TrackingEvent),
    Snapshot(serde_json::Value),
}

impl DebugPayload {
    pub fn as_tracking(&self) -> Option<&TrackingEvent> {
        match self {
            DebugPayload::Tracking(event) => Some(event),
            DebugPayload::Snapshot(_) => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&serde_json::Value> {
        match self {
            DebugPayload::Snapshot(value) => Some(value),
            DebugPayload::Tracking(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_from_runtime_error() {
        let event = TrackingEvent::error(&RuntimeError::UnknownRegionSignal { region_id: "RX".into() });
        assert!(event.is_error());
        assert_eq!(event.payload.as_ref().unwrap()["error"], "unknown_region_signal");
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_tracking_event_json_shape() {
        let event = TrackingEvent::new(TrackingEventType::Action, Some(serde_json::json!({"button": "ok"})));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["payload"]["button"], "ok");

        let bare = TrackingEvent::new(TrackingEventType::Present, None);
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_debug_payload_tagging() {
        let payload = DebugPayload::Snapshot(serde_json::json!({"collecting": true}));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "snapshot");
        assert_eq!(json["data"]["collecting"], true);
        assert!(payload.as_tracking().is_none());
    }
}
