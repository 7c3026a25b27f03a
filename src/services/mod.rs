//! Services - proximity pipeline and delivery
//!
//! This module contains the core services:
//! - `region_tracker` - Per-key state with debounce, confirmed transitions
//! - `trigger_assembler` - Transition to trigger payload, per configured rules
//! - `event_tracker` - Tracking events buffer and debug feed
//! - `dispatcher` - Dedicated delivery threads for trigger and debug handlers
//! - `manager` - Facade wiring the above, start/stop state machine
//! - `registry` - Process-wide manager slot

pub mod dispatcher;
pub mod event_tracker;
pub mod manager;
pub mod region_tracker;
pub mod registry;
pub mod trigger_assembler;

// Re-export commonly used types
pub use dispatcher::CallbackDispatcher;
pub use event_tracker::EventTracker;
pub use manager::{InitError, Manager};
pub use region_tracker::RegionStateTracker;
pub use registry::ManagerRegistry;
pub use trigger_assembler::{assemble, TriggerAssembler};
