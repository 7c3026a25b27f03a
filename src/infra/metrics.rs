//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that resets anything (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for delivery latency (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// `report()` swaps the periodic counters; `snapshot()` only reads.
pub struct Metrics {
    /// Signals accepted while collecting (monotonic)
    signals_ingested: AtomicU64,
    /// Signals since last report (reset on report)
    signals_since_report: AtomicU64,
    /// Signals dropped because the manager was stopped (monotonic)
    signals_ignored_stopped: AtomicU64,
    /// Signals older than the newest one seen for their key (monotonic)
    signals_stale: AtomicU64,
    /// Signals for unconfigured regions or beacons (monotonic)
    unknown_signals: AtomicU64,
    /// Debounced transitions confirmed (monotonic)
    transitions_confirmed: AtomicU64,
    /// Candidate changes cancelled by a reversal inside the window (monotonic)
    candidates_reset: AtomicU64,
    /// Trigger requests assembled from a matching rule (monotonic)
    triggers_assembled: AtomicU64,
    /// Trigger requests handed to the trigger handler (monotonic)
    triggers_delivered: AtomicU64,
    /// Trigger requests dropped on queue overflow (monotonic)
    triggers_dropped: AtomicU64,
    /// Debug payloads handed to the debug handler (monotonic)
    debug_delivered: AtomicU64,
    /// Debug payloads dropped on queue overflow (monotonic)
    debug_dropped: AtomicU64,
    /// Tracking events recorded (monotonic)
    tracking_events: AtomicU64,
    /// Tracking events dropped on overflow (monotonic)
    tracking_overflow: AtomicU64,
    /// Handler invocations that panicked (monotonic)
    handler_panics: AtomicU64,
    /// Handler replacements while an item was in flight (monotonic)
    handler_replaced_mid_delivery: AtomicU64,
    /// Enqueue-to-handler latency histogram (reset on report)
    delivery_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of delivery latencies (reset on report)
    delivery_latency_sum_us: AtomicU64,
    /// Max delivery latency (reset on report)
    delivery_latency_max_us: AtomicU64,
    /// Deliveries since last report (reset on report)
    deliveries_since_report: AtomicU64,
    /// Current trigger queue depth (gauge)
    trigger_queue_depth: AtomicU64,
    /// Current debug queue depth (gauge)
    debug_queue_depth: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            signals_ingested: AtomicU64::new(0),
            signals_since_report: AtomicU64::new(0),
            signals_ignored_stopped: AtomicU64::new(0),
            signals_stale: AtomicU64::new(0),
            unknown_signals: AtomicU64::new(0),
            transitions_confirmed: AtomicU64::new(0),
            candidates_reset: AtomicU64::new(0),
            triggers_assembled: AtomicU64::new(0),
            triggers_delivered: AtomicU64::new(0),
            triggers_dropped: AtomicU64::new(0),
            debug_delivered: AtomicU64::new(0),
            debug_dropped: AtomicU64::new(0),
            tracking_events: AtomicU64::new(0),
            tracking_overflow: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            handler_replaced_mid_delivery: AtomicU64::new(0),
            delivery_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            delivery_latency_sum_us: AtomicU64::new(0),
            delivery_latency_max_us: AtomicU64::new(0),
            deliveries_since_report: AtomicU64::new(0),
            trigger_queue_depth: AtomicU64::new(0),
            debug_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_signal_ingested(&self) {
        self.signals_ingested.fetch_add(1, Ordering::Relaxed);
        self.signals_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_signal_ignored(&self) {
        self.signals_ignored_stopped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_signal_stale(&self) {
        self.signals_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_signal(&self) {
        self.unknown_signals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition(&self) {
        self.transitions_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_candidate_reset(&self) {
        self.candidates_reset.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger_assembled(&self) {
        self.triggers_assembled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a trigger handed to the handler, with its time spent queued
    #[inline]
    pub fn record_trigger_delivered(&self, queued_us: u64) {
        self.triggers_delivered.fetch_add(1, Ordering::Relaxed);
        self.record_delivery_latency(queued_us);
    }

    #[inline]
    pub fn record_trigger_dropped(&self) {
        self.triggers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_debug_delivered(&self) {
        self.debug_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_debug_dropped(&self) {
        self.debug_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tracking_event(&self) {
        self.tracking_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tracking_overflow(&self) {
        self.tracking_overflow.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_handler_replaced_mid_delivery(&self) {
        self.handler_replaced_mid_delivery.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivery_latency(&self, latency_us: u64) {
        self.deliveries_since_report.fetch_add(1, Ordering::Relaxed);
        self.delivery_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.delivery_latency_max_us, latency_us);
        self.delivery_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_trigger_queue_depth(&self, depth: usize) {
        self.trigger_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_debug_queue_depth(&self, depth: usize) {
        self.debug_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn signals_ingested(&self) -> u64 {
        self.signals_ingested.load(Ordering::Relaxed)
    }

    pub fn signals_ignored(&self) -> u64 {
        self.signals_ignored_stopped.load(Ordering::Relaxed)
    }

    pub fn signals_stale(&self) -> u64 {
        self.signals_stale.load(Ordering::Relaxed)
    }

    pub fn unknown_signals(&self) -> u64 {
        self.unknown_signals.load(Ordering::Relaxed)
    }

    pub fn transitions_confirmed(&self) -> u64 {
        self.transitions_confirmed.load(Ordering::Relaxed)
    }

    pub fn triggers_delivered(&self) -> u64 {
        self.triggers_delivered.load(Ordering::Relaxed)
    }

    pub fn triggers_dropped(&self) -> u64 {
        self.triggers_dropped.load(Ordering::Relaxed)
    }

    pub fn tracking_overflow(&self) -> u64 {
        self.tracking_overflow.load(Ordering::Relaxed)
    }

    pub fn handler_panics(&self) -> u64 {
        self.handler_panics.load(Ordering::Relaxed)
    }

    /// Read all counters without resetting the periodic ones
    pub fn snapshot(&self) -> MetricsSummary {
        let buckets = load_buckets(&self.delivery_latency_buckets);
        let count = self.deliveries_since_report.load(Ordering::Relaxed);
        let sum = self.delivery_latency_sum_us.load(Ordering::Relaxed);
        let max = self.delivery_latency_max_us.load(Ordering::Relaxed);
        self.summary(0.0, count, sum, max, buckets)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let signals_count = self.signals_since_report.swap(0, Ordering::Relaxed);
        let count = self.deliveries_since_report.swap(0, Ordering::Relaxed);
        let sum = self.delivery_latency_sum_us.swap(0, Ordering::Relaxed);
        let max = self.delivery_latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.delivery_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let signals_per_sec = if elapsed.as_secs_f64() > 0.0 {
            signals_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        self.summary(signals_per_sec, count, sum, max, buckets)
    }

    fn summary(
        &self,
        signals_per_sec: f64,
        deliveries: u64,
        latency_sum: u64,
        latency_max: u64,
        buckets: [u64; NUM_BUCKETS],
    ) -> MetricsSummary {
        MetricsSummary {
            signals_ingested: self.signals_ingested.load(Ordering::Relaxed),
            signals_per_sec,
            signals_ignored_stopped: self.signals_ignored_stopped.load(Ordering::Relaxed),
            signals_stale: self.signals_stale.load(Ordering::Relaxed),
            unknown_signals: self.unknown_signals.load(Ordering::Relaxed),
            transitions_confirmed: self.transitions_confirmed.load(Ordering::Relaxed),
            candidates_reset: self.candidates_reset.load(Ordering::Relaxed),
            triggers_assembled: self.triggers_assembled.load(Ordering::Relaxed),
            triggers_delivered: self.triggers_delivered.load(Ordering::Relaxed),
            triggers_dropped: self.triggers_dropped.load(Ordering::Relaxed),
            debug_delivered: self.debug_delivered.load(Ordering::Relaxed),
            debug_dropped: self.debug_dropped.load(Ordering::Relaxed),
            tracking_events: self.tracking_events.load(Ordering::Relaxed),
            tracking_overflow: self.tracking_overflow.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            handler_replaced_mid_delivery: self
                .handler_replaced_mid_delivery
                .load(Ordering::Relaxed),
            trigger_queue_depth: self.trigger_queue_depth.load(Ordering::Relaxed),
            debug_queue_depth: self.debug_queue_depth.load(Ordering::Relaxed),
            delivery_lat_avg_us: if deliveries > 0 { latency_sum / deliveries } else { 0 },
            delivery_lat_max_us: latency_max,
            delivery_lat_p99_us: percentile_from_buckets(&buckets, 0.99),
            delivery_lat_buckets: buckets,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of all counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub signals_ingested: u64,
    pub signals_per_sec: f64,
    pub signals_ignored_stopped: u64,
    pub signals_stale: u64,
    pub unknown_signals: u64,
    pub transitions_confirmed: u64,
    pub candidates_reset: u64,
    pub triggers_assembled: u64,
    pub triggers_delivered: u64,
    pub triggers_dropped: u64,
    pub debug_delivered: u64,
    pub debug_dropped: u64,
    pub tracking_events: u64,
    pub tracking_overflow: u64,
    pub handler_panics: u64,
    pub handler_replaced_mid_delivery: u64,
    pub trigger_queue_depth: u64,
    pub debug_queue_depth: u64,
    /// Average enqueue-to-handler latency (µs)
    pub delivery_lat_avg_us: u64,
    /// Max enqueue-to-handler latency (µs)
    pub delivery_lat_max_us: u64,
    /// 99th percentile enqueue-to-handler latency (µs)
    pub delivery_lat_p99_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub delivery_lat_buckets: [u64; NUM_BUCKETS],
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            signals = %self.signals_ingested,
            signals_per_sec = format!("{:.1}", self.signals_per_sec),
            stale = %self.signals_stale,
            unknown = %self.unknown_signals,
            transitions = %self.transitions_confirmed,
            triggers_delivered = %self.triggers_delivered,
            triggers_dropped = %self.triggers_dropped,
            tracking_overflow = %self.tracking_overflow,
            handler_panics = %self.handler_panics,
            trigger_q = %self.trigger_queue_depth,
            debug_q = %self.debug_queue_depth,
            delivery_p99_us = %self.delivery_lat_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.signals_ingested(), 0);
        assert_eq!(metrics.triggers_delivered(), 0);
    }

    #[test]
    fn test_record_signals() {
        let metrics = Metrics::new();
        metrics.record_signal_ingested();
        metrics.record_signal_ingested();
        metrics.record_signal_stale();
        metrics.record_signal_ignored();

        assert_eq!(metrics.signals_ingested(), 2);
        assert_eq!(metrics.signals_stale(), 1);
        assert_eq!(metrics.signals_ignored(), 1);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_signal_ingested();
        metrics.record_trigger_delivered(100);
        metrics.record_trigger_delivered(300);

        let summary = metrics.report();
        assert_eq!(summary.signals_ingested, 1);
        assert_eq!(summary.triggers_delivered, 2);
        assert_eq!(summary.delivery_lat_avg_us, 200);
        assert_eq!(summary.delivery_lat_max_us, 300);

        // Periodic counters should be reset, monotonic ones kept
        let again = metrics.report();
        assert_eq!(again.delivery_lat_max_us, 0);
        assert_eq!(again.delivery_lat_avg_us, 0);
        assert_eq!(again.triggers_delivered, 2);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_trigger_delivered(500);
        let first = metrics.snapshot();
        let second = metrics.snapshot();
        assert_eq!(first.delivery_lat_max_us, 500);
        assert_eq!(second.delivery_lat_max_us, 500);
    }

    #[test]
    fn test_max_latency_tracking() {
        let metrics = Metrics::new();
        metrics.record_trigger_delivered(100);
        metrics.record_trigger_delivered(500);
        metrics.record_trigger_delivered(50);
        assert_eq!(metrics.delivery_latency_max_us.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_signal_ingested();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.signals_ingested(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_trigger_delivered(150);
        }
        let summary = metrics.report();
        assert_eq!(summary.delivery_lat_p99_us, 200);
    }

    #[test]
    fn test_summary_serializes() {
        let metrics = Metrics::new();
        metrics.set_trigger_queue_depth(3);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["trigger_queue_depth"], 3);
    }
}
