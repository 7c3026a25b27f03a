//! Callback dispatcher - delivers payloads to application handlers off the hot path
//!
//! Two independent channels (trigger and debug), each a bounded FIFO guarded
//! by a mutex and drained by its own dedicated thread. Ingestion only ever
//! pushes; handlers always run on the channel's delivery thread, outside the
//! channel lock, so a handler may call back into the manager.
//!
//! With no handler registered, items buffer and are flushed in order once a
//! handler arrives. When a channel is full the oldest item is evicted and
//! handed back to the caller so it can be reported.

use crate::domain::tracking::DebugPayload;
use crate::domain::trigger::TriggerRequest;
use crate::infra::metrics::Metrics;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Registered application callback
pub type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    Trigger,
    Debug,
}

impl ChannelKind {
    fn name(&self) -> &'static str {
        match self {
            ChannelKind::Trigger => "trigger",
            ChannelKind::Debug => "debug",
        }
    }

    fn thread_name(&self) -> &'static str {
        match self {
            ChannelKind::Trigger => "beacon-trigger-dispatch",
            ChannelKind::Debug => "beacon-debug-dispatch",
        }
    }
}

struct Queued<T> {
    item: T,
    enqueued_at: Instant,
}

struct ChannelState<T> {
    queue: VecDeque<Queued<T>>,
    handler: Option<Handler<T>>,
    /// Bumped on every handler replacement
    generation: u64,
    /// Generation of the handler currently running, if any
    in_flight: Option<u64>,
    closed: bool,
}

struct Channel<T> {
    kind: ChannelKind,
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    /// Signalled when work may be available (push, new handler, close)
    ready: Condvar,
    /// Signalled when the queue drains with nothing in flight
    idle: Condvar,
    metrics: Arc<Metrics>,
}

impl<T: Send + 'static> Channel<T> {
    fn new(kind: ChannelKind, capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity.max(1)),
                handler: None,
                generation: 0,
                in_flight: None,
                closed: false,
            }),
            ready: Condvar::new(),
            idle: Condvar::new(),
            metrics,
        }
    }

    /// Append an item; returns the evicted oldest item when full
    fn push(&self, item: T) -> Option<T> {
        let mut state = self.state.lock();
        let evicted = if state.queue.len() >= self.capacity {
            state.queue.pop_front().map(|q| q.item)
        } else {
            None
        };
        state.queue.push_back(Queued { item, enqueued_at: Instant::now() });
        self.record_depth(state.queue.len());
        let deliverable = state.handler.is_some();
        drop(state);

        if deliverable {
            self.ready.notify_one();
        }
        evicted
    }

    fn set_handler(&self, handler: Option<Handler<T>>) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            debug!(channel = self.kind.name(), "handler_set_on_closed_channel");
            return;
        }
        let previous = std::mem::replace(&mut state.handler, handler);
        let replaced = previous.is_some();
        state.generation += 1;
        let generation = state.generation;
        let mid_delivery = state.in_flight.is_some();
        let pending = state.queue.len();
        drop(state);

        if mid_delivery && replaced {
            self.metrics.record_handler_replaced_mid_delivery();
            info!(channel = self.kind.name(), generation = %generation, "handler_replaced_mid_delivery");
        }
        debug!(channel = self.kind.name(), generation = %generation, pending = %pending, "handler_set");
        self.ready.notify_one();
        drop(previous);
    }

    fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn has_handler(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    /// Stop the worker and release the handler
    ///
    /// The handler is dropped after the lock is released: it may own the
    /// last reference to whatever owns this channel.
    fn close(&self) {
        let released = {
            let mut state = self.state.lock();
            state.closed = true;
            state.handler.take()
        };
        self.ready.notify_all();
        self.idle.notify_all();
        drop(released);
    }

    /// Block until the queue is empty and no handler call is running
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !(state.queue.is_empty() && state.in_flight.is_none()) {
            if state.closed {
                return false;
            }
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.queue.is_empty() && state.in_flight.is_none();
            }
        }
        true
    }

    fn record_depth(&self, depth: usize) {
        match self.kind {
            ChannelKind::Trigger => self.metrics.set_trigger_queue_depth(depth),
            ChannelKind::Debug => self.metrics.set_debug_queue_depth(depth),
        }
    }

    fn record_delivered(&self, queued_us: u64) {
        match self.kind {
            ChannelKind::Trigger => self.metrics.record_trigger_delivered(queued_us),
            ChannelKind::Debug => self.metrics.record_debug_delivered(),
        }
    }

    /// Delivery loop, runs on the channel's dedicated thread until closed
    fn run(&self) {
        info!(channel = self.kind.name(), "dispatch_worker_started");
        let mut state = self.state.lock();
        loop {
            if state.closed {
                break;
            }

            let handler = match state.handler.clone() {
                Some(h) if !state.queue.is_empty() => h,
                _ => {
                    self.ready.wait(&mut state);
                    continue;
                }
            };
            let Some(queued) = state.queue.pop_front() else {
                continue;
            };
            let generation = state.generation;
            state.in_flight = Some(generation);
            self.record_depth(state.queue.len());
            drop(state);

            let queued_us = queued.enqueued_at.elapsed().as_micros() as u64;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(queued.item)));
            // Released before relocking; it may own the last reference to our owner
            drop(handler);
            self.record_delivered(queued_us);
            if let Err(cause) = outcome {
                self.metrics.record_handler_panic();
                error!(
                    channel = self.kind.name(),
                    generation = %generation,
                    reason = panic_message(cause.as_ref()),
                    "handler_panicked"
                );
            }
            if queued_us > 100_000 {
                warn!(channel = self.kind.name(), queued_us = %queued_us, "dispatch_delay_high");
            }

            state = self.state.lock();
            state.in_flight = None;
            if state.queue.is_empty() {
                self.idle.notify_all();
            }
        }
        info!(channel = self.kind.name(), "dispatch_worker_stopped");
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn spawn_worker<T: Send + 'static>(channel: &Arc<Channel<T>>) -> io::Result<JoinHandle<()>> {
    let worker = Arc::clone(channel);
    thread::Builder::new().name(channel.kind.thread_name().to_string()).spawn(move || worker.run())
}

/// Owner of the trigger and debug delivery channels
pub struct CallbackDispatcher {
    trigger: Arc<Channel<TriggerRequest>>,
    debug: Arc<Channel<DebugPayload>>,
    /// Held for the dispatcher's lifetime; dropping detaches the threads
    _workers: [JoinHandle<()>; 2],
}

impl CallbackDispatcher {
    /// Create both channels and spawn their delivery threads
    pub fn new(
        trigger_capacity: usize,
        debug_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> io::Result<Self> {
        let trigger: Arc<Channel<TriggerRequest>> =
            Arc::new(Channel::new(ChannelKind::Trigger, trigger_capacity, metrics.clone()));
        let debug: Arc<Channel<DebugPayload>> =
            Arc::new(Channel::new(ChannelKind::Debug, debug_capacity, metrics));

        let trigger_worker = spawn_worker(&trigger)?;
        let debug_worker = match spawn_worker(&debug) {
            Ok(handle) => handle,
            Err(e) => {
                trigger.close();
                return Err(e);
            }
        };

        Ok(Self { trigger, debug, _workers: [trigger_worker, debug_worker] })
    }

    /// Install the trigger handler, replacing any previous one
    ///
    /// The handler lives as long as the channel. A closure that captures an
    /// `Arc` of the owning manager keeps it alive until `close`; capture a
    /// `Weak` instead when the owner should be freed on its own.
    pub fn set_trigger_handler<F>(&self, handler: F)
    where
        F: Fn(TriggerRequest) + Send + Sync + 'static,
    {
        self.trigger.set_handler(Some(Arc::new(handler)));
    }

    pub fn clear_trigger_handler(&self) {
        self.trigger.set_handler(None);
    }

    /// Install the debug handler; same ownership rules as the trigger handler
    pub fn set_debug_handler<F>(&self, handler: F)
    where
        F: Fn(DebugPayload) + Send + Sync + 'static,
    {
        self.debug.set_handler(Some(Arc::new(handler)));
    }

    pub fn clear_debug_handler(&self) {
        self.debug.set_handler(None);
    }

    /// Queue a trigger; returns the oldest trigger if it had to be evicted
    pub fn enqueue_trigger(&self, request: TriggerRequest) -> Option<TriggerRequest> {
        self.trigger.push(request)
    }

    /// Queue a debug payload; returns the oldest payload if it had to be evicted
    pub fn enqueue_debug(&self, payload: DebugPayload) -> Option<DebugPayload> {
        self.debug.push(payload)
    }

    pub fn trigger_queue_len(&self) -> usize {
        self.trigger.len()
    }

    pub fn debug_queue_len(&self) -> usize {
        self.debug.len()
    }

    pub fn debug_capacity(&self) -> usize {
        self.debug.capacity
    }

    /// Close both channels: workers exit, handlers are released and
    /// later handler registrations are ignored. Queued items are not delivered.
    pub fn close(&self) {
        self.trigger.close();
        self.debug.close();
    }

    pub fn has_trigger_handler(&self) -> bool {
        self.trigger.has_handler()
    }

    pub fn has_debug_handler(&self) -> bool {
        self.debug.has_handler()
    }

    /// Wait until both channels are drained; false on timeout
    ///
    /// A channel with queued items and no handler never drains.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.trigger.wait_idle(timeout)
            && self.debug.wait_idle(deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
