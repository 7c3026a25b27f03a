//! Shared types for the beacon gateway

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

macro_rules! string_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a configured region
    RegionId
);

string_id!(
    /// Identifier of a beacon inside a region
    BeaconId
);

/// Proximity state of a region or beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    #[default]
    Unknown,
    Inside,
    Outside,
}

impl RegionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionState::Unknown => "unknown",
            RegionState::Inside => "inside",
            RegionState::Outside => "outside",
        }
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one independently debounced state: a region, or a beacon inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StateKey {
    pub region_id: RegionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon_id: Option<BeaconId>,
}

impl StateKey {
    pub fn region(region_id: RegionId) -> Self {
        Self { region_id, beacon_id: None }
    }

    pub fn beacon(region_id: RegionId, beacon_id: BeaconId) -> Self {
        Self { region_id, beacon_id: Some(beacon_id) }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.beacon_id {
            Some(beacon) => write!(f, "{}/{}", self.region_id, beacon),
            None => write!(f, "{}", self.region_id),
        }
    }
}

/// Raw proximity signal as delivered by the sensing layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProximityEvent {
    pub region_id: RegionId,
    pub beacon_id: Option<BeaconId>,
    pub raw_state: RegionState,
    /// Signal time in epoch milliseconds
    pub timestamp_ms: u64,
}

impl ProximityEvent {
    /// Region-level signal (monitoring)
    pub fn region(region_id: impl Into<RegionId>, raw_state: RegionState, timestamp_ms: u64) -> Self {
        Self { region_id: region_id.into(), beacon_id: None, raw_state, timestamp_ms }
    }

    /// Beacon-level signal (ranging)
    pub fn beacon(
        region_id: impl Into<RegionId>,
        beacon_id: impl Into<BeaconId>,
        raw_state: RegionState,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            beacon_id: Some(beacon_id.into()),
            raw_state,
            timestamp_ms,
        }
    }

    pub fn key(&self) -> StateKey {
        StateKey { region_id: self.region_id.clone(), beacon_id: self.beacon_id.clone() }
    }
}

/// A confirmed (debounced) change of state for one key
///
/// `from != to` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub region_id: RegionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon_id: Option<BeaconId>,
    pub from: RegionState,
    pub to: RegionState,
    /// Confirmation time in epoch milliseconds
    pub timestamp_ms: u64,
}

impl Transition {
    pub fn key(&self) -> StateKey {
        StateKey { region_id: self.region_id.clone(), beacon_id: self.beacon_id.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_region_state_default_is_unknown() {
        assert_eq!(RegionState::default(), RegionState::Unknown);
    }

    #[test]
    fn test_region_state_serde_lowercase() {
        assert_eq!(serde_json::to_string(&RegionState::Inside).unwrap(), "\"inside\"");
        let parsed: RegionState = serde_json::from_str("\"outside\"").unwrap();
        assert_eq!(parsed, RegionState::Outside);
    }

    #[test]
    fn test_state_key_display() {
        assert_eq!(StateKey::region(RegionId::from("R1")).to_string(), "R1");
        assert_eq!(StateKey::beacon("R1".into(), "B1".into()).to_string(), "R1/B1");
    }

    #[test]
    fn test_region_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(RegionId::from("R1"), 7);
        assert_eq!(map.get("R1"), Some(&7));
        assert_eq!(map.get("R2"), None);
    }

    #[test]
    fn test_event_key_matches_transition_key() {
        let event = ProximityEvent::beacon("R1", "B1", RegionState::Inside, 10);
        let transition = Transition {
            region_id: "R1".into(),
            beacon_id: Some("B1".into()),
            from: RegionState::Unknown,
            to: RegionState::Inside,
            timestamp_ms: 10,
        };
        assert_eq!(event.key(), transition.key());
    }

    #[test]
    fn test_uuid_v7_unique() {
        assert_ne!(new_uuid_v7(), new_uuid_v7());
    }
}
