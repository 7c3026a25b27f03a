//! Domain models - core types of the proximity pipeline
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - identifiers, `RegionState`, `ProximityEvent`, `Transition`
//! - `region` - `Region`, `Beacon` and `TriggerRule`
//! - `trigger` - `TriggerRequest`, the ordered backend-facing payload
//! - `tracking` - `TrackingEvent` and `DebugPayload`
//! - `error` - runtime errors recorded as Error tracking events

pub mod error;
pub mod region;
pub mod tracking;
pub mod trigger;
pub mod types;

// Re-export commonly used types at module level
pub use error::RuntimeError;
pub use region::{Beacon, Region, TriggerEvent, TriggerRule};
pub use tracking::{DebugPayload, TrackingEvent, TrackingEventType};
pub use trigger::{PayloadValue, TriggerRequest};
pub use types::{BeaconId, ProximityEvent, RegionId, RegionState, StateKey, Transition};
