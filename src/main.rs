//! beacon-gateway - replays proximity signals through the beacon manager
//!
//! Reads a JSONL signal file, feeds it to the process-wide manager (optionally
//! paced in real time), appends every delivered trigger to a JSONL log and
//! logs debug payloads. On end of input or Ctrl+C it stops collecting and
//! waits for the delivery queues to drain.
//!
//! Module structure:
//! - `domain/` - Core types (regions, transitions, triggers, tracking events)
//! - `io/` - External interfaces (signal records, trigger log)
//! - `services/` - State tracking, assembly, dispatch, manager facade
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use beacon_gateway::domain::tracking::DebugPayload;
use beacon_gateway::domain::types::ProximityEvent;
use beacon_gateway::infra::Configuration;
use beacon_gateway::io::{SignalReader, TriggerLog};
use beacon_gateway::services::Manager;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Beacon gateway - proximity signal replay
#[derive(Parser, Debug)]
#[command(name = "beacon-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to BEACON_CONFIG, then config/beacons.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// JSONL file of proximity signals
    #[arg(short, long)]
    signals: String,

    /// JSONL file delivered triggers are appended to
    #[arg(short, long, default_value = "triggers.jsonl")]
    triggers: String,

    /// Sleep between signals according to their timestamps
    #[arg(long)]
    realtime: bool,

    /// Replay speed multiplier for --realtime
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// How long to wait for queued deliveries at shutdown
    #[arg(long, default_value_t = 5000)]
    drain_timeout_ms: u64,

    /// Interval between metrics log lines
    #[arg(long, default_value_t = 10)]
    metrics_interval_secs: u64,

    /// Emit log lines as JSON objects
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Default)]
struct ReplayStats {
    signals: u64,
    rejected_lines: u64,
    transitions: u64,
    last_timestamp_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-signal visibility
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }

    info!(git_hash = env!("GIT_HASH"), "beacon-gateway starting");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Configuration::resolve_config_path(&std::env::args().collect::<Vec<_>>()));
    let config = Configuration::from_file(&config_path)?;

    info!(
        config_file = %config.config_file(),
        regions = %config.regions().len(),
        debounce_window_ms = %config.debounce_window_ms(),
        trigger_buffer_capacity = %config.trigger_buffer_capacity(),
        tracking_buffer_capacity = %config.tracking_buffer_capacity(),
        debug_verbosity = ?config.debug_verbosity(),
        "config_loaded"
    );

    let window_ms = config.debounce_window_ms();
    let manager = Manager::init_with_configuration(config)?;

    let trigger_log = TriggerLog::new(&args.triggers);
    manager.set_trigger_handler(move |request| {
        trigger_log.write_trigger(&request);
    });
    manager.set_debug_handler(log_debug_payload);

    // Start metrics reporter
    let metrics_manager = manager.clone();
    let metrics_interval = args.metrics_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_manager.report_metrics().log();
        }
    });

    let signals_path = args.signals.clone();
    let loaded = tokio::task::spawn_blocking(move || read_signal_file(&signals_path))
        .await
        .context("signal reader task failed")??;
    info!(signals = %loaded.0.len(), rejected_lines = %loaded.1, file = %args.signals, "signals_loaded");

    manager.start_collecting();

    let pacing = args.realtime.then_some(args.speed.max(0.001));
    let stats = tokio::select! {
        stats = replay(manager.clone(), loaded, pacing) => Some(stats),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
            None
        }
    };

    if let Some(stats) = stats {
        // The platform goes silent after a change; confirm what is still pending
        let mut flushed = 0;
        if let Some(last) = stats.last_timestamp_ms {
            flushed = manager.tick(last.saturating_add(window_ms)).len();
        }
        info!(
            signals = %stats.signals,
            rejected_lines = %stats.rejected_lines,
            transitions = %stats.transitions,
            flushed_transitions = %flushed,
            "replay_complete"
        );
    }

    manager.stop_collecting();
    shutdown(manager, Duration::from_millis(args.drain_timeout_ms)).await?;

    info!("beacon-gateway shutdown complete");
    Ok(())
}

/// Read and parse all signals; malformed lines are logged and skipped
fn read_signal_file(path: &str) -> anyhow::Result<(Vec<ProximityEvent>, u64)> {
    let file = File::open(path).with_context(|| format!("Failed to open signal file {}", path))?;
    let mut events = Vec::new();
    let mut rejected = 0;
    for result in SignalReader::new(BufReader::new(file)) {
        match result {
            Ok(event) => events.push(event),
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "signal_line_rejected");
            }
        }
    }
    Ok((events, rejected))
}

async fn replay(
    manager: Arc<Manager>,
    (events, rejected_lines): (Vec<ProximityEvent>, u64),
    pacing: Option<f64>,
) -> ReplayStats {
    let mut stats = ReplayStats { rejected_lines, ..ReplayStats::default() };

    for event in events {
        if let (Some(speed), Some(last)) = (pacing, stats.last_timestamp_ms) {
            let delta_ms = event.timestamp_ms.saturating_sub(last);
            if delta_ms > 0 {
                tokio::time::sleep(Duration::from_secs_f64(delta_ms as f64 / 1000.0 / speed)).await;
            }
        }

        // Sweep silent keys up to the signal clock before feeding the signal
        stats.transitions += manager.tick(event.timestamp_ms).len() as u64;

        let timestamp_ms = event.timestamp_ms;
        if manager.ingest(event).is_some() {
            stats.transitions += 1;
        }
        stats.signals += 1;
        stats.last_timestamp_ms = Some(stats.last_timestamp_ms.map_or(timestamp_ms, |t| t.max(timestamp_ms)));

        // Let the delivery threads and the metrics task breathe between signals
        tokio::task::yield_now().await;
    }
    stats
}

async fn shutdown(manager: Arc<Manager>, timeout: Duration) -> anyhow::Result<()> {
    let waiter = manager.clone();
    let drained = tokio::task::spawn_blocking(move || waiter.wait_for_delivery(timeout))
        .await
        .context("delivery wait task failed")?;
    if !drained {
        warn!(timeout_ms = %timeout.as_millis(), "delivery_queues_not_drained");
    }

    let tracking = manager.drain_tracking_events();
    info!(tracking_events = %tracking.len(), "tracking_events_drained");
    manager.report_metrics().log();
    Ok(())
}

fn log_debug_payload(payload: DebugPayload) {
    match payload {
        DebugPayload::Tracking(event) => {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                payload = %event.payload.map(|p| p.to_string()).unwrap_or_default(),
                "tracking_event"
            );
        }
        DebugPayload::Snapshot(value) => {
            debug!(snapshot = %value, "debug_snapshot");
        }
    }
}
