//! Manager facade - wires state tracking, assembly, tracking and delivery
//!
//! The Manager owns:
//! - the region/beacon state tracker (debounce, confirmed transitions)
//! - the trigger assembler (transition to payload)
//! - the event tracker (analytics events, debug feed)
//! - the callback dispatcher (trigger and debug delivery threads)
//!
//! It starts Stopped. While stopped, signals and ticks are ignored but all
//! state and buffers are kept.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::tracking::{DebugPayload, TrackingEvent, TrackingEventType};
use crate::domain::trigger::TriggerRequest;
use crate::domain::types::RegionState;
use crate::infra::config::{Configuration, ConfigurationError};
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::dispatcher::CallbackDispatcher;
use crate::services::event_tracker::EventTracker;
use crate::services::region_tracker::RegionStateTracker;
use crate::services::registry;
use crate::services::trigger_assembler::TriggerAssembler;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Why a manager could not be built
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Proximity manager: the entry point for signal sources and applications
pub struct Manager {
    /// Shared, immutable configuration
    pub(crate) config: Arc<Configuration>,
    /// Stopped (false) or Collecting (true)
    pub(crate) collecting: AtomicBool,
    /// Authoritative per-key state
    pub(crate) regions: RegionStateTracker,
    /// Transition to trigger payload
    pub(crate) assembler: TriggerAssembler,
    /// Analytics events and debug feed
    pub(crate) events: Arc<EventTracker>,
    /// Trigger and debug delivery
    pub(crate) dispatcher: Arc<CallbackDispatcher>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Manager {
    /// Build a stopped manager and spawn its delivery threads
    pub fn new(config: Configuration) -> Result<Self, InitError> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());

        // The debug channel carries every forwarded tracking event, so it gets
        // the same bound as the tracking buffer
        let dispatcher = Arc::new(
            CallbackDispatcher::new(
                config.trigger_buffer_capacity(),
                config.tracking_buffer_capacity(),
                metrics.clone(),
            )
            .map_err(InitError::Spawn)?,
        );
        let events = Arc::new(EventTracker::new(
            config.tracking_buffer_capacity(),
            config.debug_verbosity(),
            dispatcher.clone(),
            metrics.clone(),
        ));
        let regions = RegionStateTracker::new(&config, events.clone(), metrics.clone());
        let assembler = TriggerAssembler::new(config.clone());

        info!(
            regions = %config.regions().len(),
            debounce_window_ms = %config.debounce_window_ms(),
            trigger_capacity = %config.trigger_buffer_capacity(),
            tracking_capacity = %config.tracking_buffer_capacity(),
            verbosity = ?config.debug_verbosity(),
            "manager_created"
        );

        Ok(Self {
            config,
            collecting: AtomicBool::new(false),
            regions,
            assembler,
            events,
            dispatcher,
            metrics,
        })
    }

    /// Current process-wide instance, if one was initialized
    pub fn shared() -> Option<Arc<Manager>> {
        registry::global().shared()
    }

    /// Build a new instance and make it the process-wide one
    pub fn init_with_configuration(config: Configuration) -> Result<Arc<Manager>, InitError> {
        registry::global().init_with_configuration(config)
    }

    /// Stopped -> Collecting; returns false if already collecting
    ///
    /// Each successful call records exactly one Present tracking event.
    pub fn start_collecting(&self) -> bool {
        if self
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!("collecting_started");
        self.events.track(
            TrackingEventType::Present,
            Some(serde_json::json!({ "trigger": "start_collecting" })),
        );
        true
    }

    /// Collecting -> Stopped; returns false if already stopped
    ///
    /// Never waits for queued deliveries.
    pub fn stop_collecting(&self) -> bool {
        if self
            .collecting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!(
            pending_triggers = %self.dispatcher.trigger_queue_len(),
            pending_debug = %self.dispatcher.debug_queue_len(),
            "collecting_stopped"
        );
        true
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// Stop collecting and close both delivery channels
    ///
    /// Handlers are released, which breaks any cycle formed by a handler
    /// holding an `Arc` of this manager. Queued items are discarded and
    /// handlers set afterwards are ignored. State reads keep working.
    pub fn shutdown(&self) {
        self.stop_collecting();
        info!(
            discarded_triggers = %self.dispatcher.trigger_queue_len(),
            discarded_debug = %self.dispatcher.debug_queue_len(),
            "manager_shutdown"
        );
        self.dispatcher.close();
    }

    /// Install the trigger handler
    ///
    /// Prefer capturing a `Weak<Manager>` over an `Arc<Manager>`: a strong
    /// capture keeps this instance alive until `shutdown`.
    pub fn set_trigger_handler<F>(&self, handler: F)
    where
        F: Fn(TriggerRequest) + Send + Sync + 'static,
    {
        self.dispatcher.set_trigger_handler(handler);
    }

    pub fn clear_trigger_handler(&self) {
        self.dispatcher.clear_trigger_handler();
    }

    pub fn set_debug_handler<F>(&self, handler: F)
    where
        F: Fn(DebugPayload) + Send + Sync + 'static,
    {
        self.dispatcher.set_debug_handler(handler);
    }

    pub fn clear_debug_handler(&self) {
        self.dispatcher.clear_debug_handler();
    }

    /// Record an application tracking event; returns its id
    pub fn track(&self, event_type: TrackingEventType, payload: Option<serde_json::Value>) -> String {
        self.events.track(event_type, payload)
    }

    /// Aggregate state of one region, valid in any collecting state
    pub fn region_state(&self, region_id: &str) -> RegionState {
        self.regions.region_state(region_id)
    }

    /// Confirmed state of a single key
    pub fn beacon_state(&self, region_id: &str, beacon_id: &str) -> RegionState {
        self.regions.current_state(region_id, Some(beacon_id))
    }

    /// Aggregate state over every configured region
    pub fn overall_state(&self) -> RegionState {
        self.regions.overall_state()
    }

    /// Hand buffered tracking events to the caller's transport
    pub fn drain_tracking_events(&self) -> Vec<TrackingEvent> {
        self.events.drain()
    }

    /// JSON dump of key states, queue depths and counters
    ///
    /// Also pushed to the debug channel when verbosity allows snapshots.
    pub fn debug_snapshot(&self) -> serde_json::Value {
        let snapshot = serde_json::json!({
            "collecting": self.is_collecting(),
            "debounce_window_ms": self.config.debounce_window_ms(),
            "overall_state": self.overall_state(),
            "keys": self.regions.snapshot(),
            "trigger_queue": self.dispatcher.trigger_queue_len(),
            "debug_queue": self.dispatcher.debug_queue_len(),
            "tracking_buffered": self.events.len(),
            "trigger_handler": self.dispatcher.has_trigger_handler(),
            "debug_handler": self.dispatcher.has_debug_handler(),
            "metrics": self.metrics.snapshot(),
        });
        self.events.emit_debug(snapshot.clone());
        snapshot
    }

    /// Counters without resetting the periodic ones
    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.snapshot()
    }

    /// Counters, resetting the periodic ones (for interval logging)
    pub fn report_metrics(&self) -> MetricsSummary {
        self.metrics.report()
    }

    /// Block until both delivery queues drain; false on timeout
    pub fn wait_for_delivery(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }
}
