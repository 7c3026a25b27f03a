//! Trigger payloads handed to the application's trigger handler
//!
//! A `TriggerRequest` is an ordered list of string keys mapped to scalar
//! values. Key order is part of the wire shape: required keys first
//! (`regionId`, `beaconId`, `eventType`, `timestamp`), then rule extras.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;

pub const KEY_REGION_ID: &str = "regionId";
pub const KEY_BEACON_ID: &str = "beaconId";
pub const KEY_EVENT_TYPE: &str = "eventType";
pub const KEY_TIMESTAMP: &str = "timestamp";

/// Keys the assembler owns; rule extras may not use them
pub const RESERVED_KEYS: [&str; 4] = [KEY_REGION_ID, KEY_BEACON_ID, KEY_EVENT_TYPE, KEY_TIMESTAMP];

/// Scalar value inside a trigger payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadValue::Bool(v) => write!(f, "{v}"),
            PayloadValue::Integer(v) => write!(f, "{v}"),
            PayloadValue::Float(v) => write!(f, "{v}"),
            PayloadValue::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::String(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::String(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Integer(v)
    }
}

impl From<u64> for PayloadValue {
    fn from(v: u64) -> Self {
        // Timestamps are epoch ms and fit comfortably in i64
        PayloadValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        PayloadValue::Float(v)
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

/// Backend-facing trigger payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriggerRequest {
    fields: SmallVec<[(String, PayloadValue); 8]>,
}

impl TriggerRequest {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a field; an existing key keeps its position and takes the new value
    pub(crate) fn insert(&mut self, key: &str, value: impl Into<PayloadValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn region_id(&self) -> Option<&str> {
        self.get(KEY_REGION_ID).and_then(PayloadValue::as_str)
    }

    pub fn beacon_id(&self) -> Option<&str> {
        self.get(KEY_BEACON_ID).and_then(PayloadValue::as_str)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.get(KEY_EVENT_TYPE).and_then(PayloadValue::as_str)
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.get(KEY_TIMESTAMP).and_then(PayloadValue::as_i64)
    }

    /// Serialized JSON bytes, stable for identical payloads
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Serialized JSON string (one line)
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for TriggerRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
