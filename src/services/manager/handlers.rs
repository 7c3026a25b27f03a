//! Signal handling for the Manager
//!
//! Signals flow: state tracker -> (confirmed transition, under the key lock)
//! -> assembler -> trigger queue. Holding the key lock across the enqueue
//! keeps trigger order per key equal to transition order.

use super::Manager;
use crate::domain::error::RuntimeError;
use crate::domain::types::{ProximityEvent, RegionId, Transition};
use tracing::{debug, warn};

impl Manager {
    /// Feed one raw proximity signal
    ///
    /// Never fails: unknown keys become Error tracking events, and signals
    /// received while stopped are dropped.
    pub fn ingest(&self, event: ProximityEvent) -> Option<Transition> {
        if !self.is_collecting() {
            self.metrics.record_signal_ignored();
            debug!(
                region_id = %event.region_id,
                raw_state = %event.raw_state,
                "signal_ignored_stopped"
            );
            return None;
        }
        self.metrics.record_signal_ingested();
        self.regions.ingest_with(&event, |transition| self.handle_transition(transition))
    }

    /// Confirm candidates whose window elapsed without a new signal
    pub fn tick(&self, now_ms: u64) -> Vec<Transition> {
        if !self.is_collecting() {
            return Vec::new();
        }
        self.regions.poll_with(now_ms, |transition| self.handle_transition(transition))
    }

    /// Runs under the transition's key lock
    pub(crate) fn handle_transition(&self, transition: &Transition) {
        if self.events.verbosity().forwards_diagnostics() {
            self.events.emit_diagnostic(serde_json::json!({ "transition": transition }));
        }

        let Some(request) = self.assembler.assemble(transition) else {
            debug!(
                region_id = %transition.region_id,
                from = %transition.from,
                to = %transition.to,
                "transition_without_rule"
            );
            return;
        };
        self.metrics.record_trigger_assembled();
        debug!(
            region_id = %transition.region_id,
            event_type = request.event_type().unwrap_or_default(),
            timestamp_ms = %transition.timestamp_ms,
            "trigger_enqueued"
        );

        if let Some(dropped) = self.dispatcher.enqueue_trigger(request) {
            self.handle_trigger_overflow(dropped.region_id().unwrap_or_default());
        }
    }

    fn handle_trigger_overflow(&self, dropped_region: &str) {
        let capacity = self.config.trigger_buffer_capacity();
        self.metrics.record_trigger_dropped();
        warn!(region_id = %dropped_region, capacity = %capacity, "trigger_buffer_overflow");
        self.events.record_error(&RuntimeError::TriggerBufferOverflow {
            region_id: RegionId::from(dropped_region),
            capacity,
        });
    }
}
