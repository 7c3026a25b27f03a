//! Tracking event buffer and debug channel feed
//!
//! Tracking events (Present, Action, Error) accumulate in a bounded queue
//! until the application drains them. Every recorded event is also forwarded
//! to the debug channel, filtered by the configured verbosity.
//!
//! Overflow of either buffer is itself recorded as an Error event in the
//! queue. One slot past `capacity` is reserved for the tracking overflow
//! notice, so recording it never evicts anything; while a notice is queued
//! further overflows are only counted.

use crate::domain::error::RuntimeError;
use crate::domain::tracking::{DebugPayload, TrackingEvent, TrackingEventType};
use crate::infra::config::DebugVerbosity;
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::CallbackDispatcher;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

struct TrackingQueue {
    events: VecDeque<TrackingEvent>,
    /// Id of the queued tracking overflow notice, if one is waiting
    overflow_notice: Option<String>,
}

pub struct EventTracker {
    queue: Mutex<TrackingQueue>,
    capacity: usize,
    verbosity: DebugVerbosity,
    dispatcher: Arc<CallbackDispatcher>,
    metrics: Arc<Metrics>,
}

impl EventTracker {
    pub fn new(
        capacity: usize,
        verbosity: DebugVerbosity,
        dispatcher: Arc<CallbackDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(TrackingQueue {
                events: VecDeque::with_capacity(capacity + 1),
                overflow_notice: None,
            }),
            capacity,
            verbosity,
            dispatcher,
            metrics,
        }
    }

    /// Record a new tracking event and return its id
    pub fn track(&self, event_type: TrackingEventType, payload: Option<serde_json::Value>) -> String {
        let event = TrackingEvent::new(event_type, payload);
        let id = event.id.clone();
        self.record(event);
        id
    }

    /// Record a runtime error as an Error tracking event
    pub fn record_error(&self, err: &RuntimeError) {
        self.record(TrackingEvent::error(err));
    }

    /// Queue an event and forward it, plus any overflow notice it caused
    pub fn record(&self, event: TrackingEvent) {
        let notice = self.enqueue(event.clone());
        debug!(event_id = %event.id, event_type = %event.event_type, "tracking_event_recorded");
        if let Some(notice) = notice {
            self.forward(notice);
        }
        self.forward(event);
    }

    /// Append to the bounded queue, evicting the oldest event when full
    ///
    /// Returns the overflow notice when this call queued one. Nothing is
    /// forwarded from here, so debug overflow can record through it safely.
    fn enqueue(&self, event: TrackingEvent) -> Option<TrackingEvent> {
        let mut queue = self.queue.lock();
        let mut notice = None;
        if queue.events.len() >= self.capacity {
            if let Some(dropped) = queue.events.pop_front() {
                if queue.overflow_notice.as_deref() == Some(dropped.id.as_str()) {
                    queue.overflow_notice = None;
                }
                self.metrics.record_tracking_overflow();
                warn!(
                    dropped_id = %dropped.id,
                    dropped_type = %dropped.event_type,
                    capacity = %self.capacity,
                    "tracking_overflow"
                );
            }
            if queue.overflow_notice.is_none() {
                let error = TrackingEvent::error(&RuntimeError::TrackingBufferOverflow { capacity: self.capacity });
                queue.overflow_notice = Some(error.id.clone());
                queue.events.push_back(error.clone());
                notice = Some(error);
            }
        }
        queue.events.push_back(event);
        drop(queue);

        self.metrics.record_tracking_event();
        notice
    }

    /// Push an ad-hoc diagnostic snapshot to the debug channel
    pub fn emit_debug(&self, snapshot: serde_json::Value) {
        if self.verbosity.forwards_snapshots() {
            self.send_debug(DebugPayload::Snapshot(snapshot));
        }
    }

    /// Push a per-transition diagnostic, only at verbose level
    pub fn emit_diagnostic(&self, diagnostic: serde_json::Value) {
        if self.verbosity.forwards_diagnostics() {
            self.send_debug(DebugPayload::Snapshot(diagnostic));
        }
    }

    /// Hand over every buffered event, oldest first
    pub fn drain(&self) -> Vec<TrackingEvent> {
        let mut queue = self.queue.lock();
        queue.overflow_notice = None;
        queue.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn verbosity(&self) -> DebugVerbosity {
        self.verbosity
    }

    fn forward(&self, event: TrackingEvent) {
        if self.verbosity.forwards_event(event.is_error()) {
            self.send_debug(DebugPayload::Tracking(event));
        }
    }

    /// Debug overflow is queued as an Error event but never forwarded
    fn send_debug(&self, payload: DebugPayload) {
        if self.dispatcher.enqueue_debug(payload).is_some() {
            let capacity = self.dispatcher.debug_capacity();
            self.metrics.record_debug_dropped();
            warn!(capacity = %capacity, "debug_buffer_overflow");
            self.enqueue(TrackingEvent::error(&RuntimeError::DebugBufferOverflow { capacity }));
        }
    }
}
