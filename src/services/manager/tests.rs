//! Scenario tests for the Manager

use super::*;
use crate::domain::region::{Region, TriggerRule};
use crate::domain::types::ProximityEvent;
use crate::infra::config::DebugVerbosity;
use std::sync::mpsc;
use std::thread;

const WAIT: Duration = Duration::from_secs(2);

/// R1 with beacons B1/B2: enter+exit rules on both beacons and the region
fn config_with(window_ms: u64, trigger_capacity: usize, verbosity: DebugVerbosity) -> Configuration {
    Configuration::builder()
        .debounce_window_ms(window_ms)
        .trigger_buffer_capacity(trigger_capacity)
        .debug_verbosity(verbosity)
        .region(
            Region::new("R1")
                .with_beacon("B1")
                .with_beacon("B2")
                .with_rule(TriggerRule::on_enter().for_beacon("B1"))
                .with_rule(TriggerRule::on_exit().for_beacon("B1"))
                .with_rule(TriggerRule::on_enter().for_beacon("B2"))
                .with_rule(TriggerRule::on_exit().for_beacon("B2"))
                .with_rule(TriggerRule::on_enter()),
        )
        .region(Region::new("R2").with_rule(TriggerRule::on_enter()))
        .build()
        .unwrap()
}

fn started(config: Configuration) -> Manager {
    let manager = Manager::new(config).unwrap();
    assert!(manager.start_collecting());
    manager
}

fn b1(state: RegionState, ts: u64) -> ProximityEvent {
    ProximityEvent::beacon("R1", "B1", state, ts)
}

fn trigger_channel(manager: &Manager) -> mpsc::Receiver<TriggerRequest> {
    let (tx, rx) = mpsc::channel();
    manager.set_trigger_handler(move |r| {
        let _ = tx.send(r);
    });
    rx
}

#[test]
fn test_enter_after_debounce_emits_one_trigger() {
    let manager = started(config_with(5000, 64, DebugVerbosity::Info));
    let rx = trigger_channel(&manager);

    manager.ingest(b1(RegionState::Inside, 0));
    manager.ingest(b1(RegionState::Inside, 6000));

    let request = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(request.to_json(), r#"{"regionId":"R1","beaconId":"B1","eventType":"enter","timestamp":5000}"#);
    assert!(manager.wait_for_delivery(WAIT));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_unknown_region_emits_one_error_and_no_trigger() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    let rx = trigger_channel(&manager);
    manager.drain_tracking_events();

    assert!(manager.ingest(ProximityEvent::region("R9", RegionState::Inside, 1)).is_none());

    let events = manager.drain_tracking_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, TrackingEventType::Error);
    assert!(manager.wait_for_delivery(WAIT));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_start_emits_single_present_before_triggers() {
    let manager = Manager::new(config_with(0, 64, DebugVerbosity::Info)).unwrap();
    assert!(manager.start_collecting());
    assert!(!manager.start_collecting());
    manager.ingest(b1(RegionState::Inside, 1));

    let events = manager.drain_tracking_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, TrackingEventType::Present);
    assert_eq!(events[0].payload.as_ref().unwrap()["trigger"], "start_collecting");
}

#[test]
fn test_each_restart_emits_present_again() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    assert!(manager.stop_collecting());
    assert!(!manager.stop_collecting());
    assert!(manager.start_collecting());

    let presents = manager
        .drain_tracking_events()
        .into_iter()
        .filter(|e| e.event_type == TrackingEventType::Present)
        .count();
    assert_eq!(presents, 2);
}

#[test]
fn test_stopped_manager_ignores_signals() {
    let manager = Manager::new(config_with(0, 64, DebugVerbosity::Info)).unwrap();
    assert!(manager.ingest(b1(RegionState::Inside, 1)).is_none());
    assert!(manager.tick(10_000).is_empty());
    assert_eq!(manager.beacon_state("R1", "B1"), RegionState::Unknown);
    assert_eq!(manager.metrics().signals_ignored_stopped, 1);
}

#[test]
fn test_stop_start_keeps_state() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    manager.ingest(b1(RegionState::Inside, 1));
    assert_eq!(manager.region_state("R1"), RegionState::Inside);

    manager.stop_collecting();
    assert_eq!(manager.region_state("R1"), RegionState::Inside);
    manager.start_collecting();
    assert_eq!(manager.region_state("R1"), RegionState::Inside);

    // Still Inside, so a repeated Inside signal is not a new enter
    assert!(manager.ingest(b1(RegionState::Inside, 2)).is_none());
}

#[test]
fn test_buffers_persist_across_stop() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    manager.ingest(b1(RegionState::Inside, 1));
    manager.stop_collecting();

    let rx = trigger_channel(&manager);
    let request = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(request.event_type(), Some("enter"));
}

#[test]
fn test_trigger_overflow_drops_oldest_then_flushes_in_order() {
    let capacity = 3;
    let manager = started(config_with(0, capacity, DebugVerbosity::Info));
    manager.drain_tracking_events();

    // capacity + 1 enters/exits on B1 with no handler registered
    let states = [RegionState::Inside, RegionState::Outside, RegionState::Inside, RegionState::Outside];
    for (i, state) in states.iter().enumerate() {
        assert!(manager.ingest(b1(*state, i as u64 + 1)).is_some());
    }

    let errors = manager.drain_tracking_events();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload.as_ref().unwrap()["error"], "trigger_buffer_overflow");
    assert_eq!(manager.metrics().triggers_dropped, 1);

    let rx = trigger_channel(&manager);
    let delivered: Vec<i64> =
        (0..capacity).map(|_| rx.recv_timeout(WAIT).unwrap().timestamp_ms().unwrap()).collect();
    assert_eq!(delivered, vec![2, 3, 4]);
    assert!(manager.wait_for_delivery(WAIT));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_per_key_fifo_delivery() {
    let manager = started(config_with(0, 256, DebugVerbosity::Off));
    let rx = trigger_channel(&manager);

    for i in 0..100u64 {
        let state = if i % 2 == 0 { RegionState::Inside } else { RegionState::Outside };
        manager.ingest(b1(state, i + 1));
    }

    let mut last = 0;
    for _ in 0..100 {
        let ts = rx.recv_timeout(WAIT).unwrap().timestamp_ms().unwrap();
        assert!(ts > last);
        last = ts;
    }
}

#[test]
fn test_concurrent_ingest_on_distinct_keys() {
    let manager = Arc::new(started(config_with(0, 1024, DebugVerbosity::Off)));
    let rx = trigger_channel(&manager);

    let handles: Vec<_> = ["B1", "B2"]
        .into_iter()
        .map(|beacon| {
            let m = manager.clone();
            thread::spawn(move || {
                for i in 0..200u64 {
                    let state = if i % 2 == 0 { RegionState::Inside } else { RegionState::Outside };
                    m.ingest(ProximityEvent::beacon("R1", beacon, state, i + 1));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut last_by_beacon = std::collections::HashMap::new();
    for _ in 0..400 {
        let request = rx.recv_timeout(WAIT).unwrap();
        let beacon = request.beacon_id().unwrap().to_string();
        let ts = request.timestamp_ms().unwrap();
        let last = last_by_beacon.insert(beacon, ts).unwrap_or(0);
        assert!(ts > last, "per-key order violated");
    }
    assert_eq!(manager.metrics().transitions_confirmed, 400);
}

#[test]
fn test_tick_confirms_silent_candidate() {
    let manager = started(config_with(5000, 64, DebugVerbosity::Info));
    let rx = trigger_channel(&manager);

    manager.ingest(b1(RegionState::Inside, 1000));
    assert!(manager.tick(5999).is_empty());
    let transitions = manager.tick(6000);
    assert_eq!(transitions.len(), 1);

    let request = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(request.timestamp_ms(), Some(6000));
}

#[test]
fn test_handler_replacement_receives_pending_items() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    manager.ingest(b1(RegionState::Inside, 1));
    manager.ingest(b1(RegionState::Outside, 2));

    // The old handler holds the first trigger until released
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = parking_lot::Mutex::new(release_rx);
    let (old_tx, old_rx) = mpsc::channel();
    manager.set_trigger_handler(move |r| {
        let _ = entered_tx.send(());
        let _ = release_rx.lock().recv_timeout(WAIT);
        let _ = old_tx.send(r.timestamp_ms().unwrap());
    });
    entered_rx.recv_timeout(WAIT).unwrap();

    let rx = trigger_channel(&manager);
    release_tx.send(()).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap().timestamp_ms(), Some(2));
    assert!(manager.wait_for_delivery(WAIT));
    assert_eq!(old_rx.try_iter().collect::<Vec<_>>(), vec![1]);
    assert!(rx.try_recv().is_err());
    assert_eq!(manager.metrics().handler_replaced_mid_delivery, 1);
}

#[test]
fn test_panicking_trigger_handler_does_not_stop_delivery() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    let (tx, rx) = mpsc::channel();
    manager.set_trigger_handler(move |r| {
        if r.event_type() == Some("enter") {
            panic!("handler failure");
        }
        let _ = tx.send(r);
    });

    manager.ingest(b1(RegionState::Inside, 1));
    manager.ingest(b1(RegionState::Outside, 2));

    let request = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(request.event_type(), Some("exit"));
    assert!(manager.wait_for_delivery(WAIT));
    assert_eq!(manager.metrics().handler_panics, 1);
}

#[test]
fn test_debug_handler_receives_tracking_events() {
    let manager = Manager::new(config_with(0, 64, DebugVerbosity::Info)).unwrap();
    let (tx, rx) = mpsc::channel();
    manager.set_debug_handler(move |p| {
        let _ = tx.send(p);
    });
    manager.start_collecting();

    let payload = rx.recv_timeout(WAIT).unwrap();
    let event = payload.as_tracking().unwrap();
    assert_eq!(event.event_type, TrackingEventType::Present);
}

#[test]
fn test_verbosity_off_keeps_debug_channel_silent() {
    let manager = started(config_with(0, 64, DebugVerbosity::Off));
    manager.ingest(ProximityEvent::region("R9", RegionState::Inside, 1));
    manager.debug_snapshot();
    assert_eq!(manager.dispatcher.debug_queue_len(), 0);
    // Tracking buffer is unaffected by verbosity
    assert_eq!(manager.drain_tracking_events().len(), 2);
}

#[test]
fn test_verbose_emits_transition_diagnostics() {
    let manager = started(config_with(0, 64, DebugVerbosity::Verbose));
    let (tx, rx) = mpsc::channel();
    manager.set_debug_handler(move |p| {
        let _ = tx.send(p);
    });
    manager.ingest(b1(RegionState::Inside, 1));

    let mut found = false;
    while let Ok(payload) = rx.recv_timeout(Duration::from_millis(300)) {
        if let Some(snapshot) = payload.as_snapshot() {
            if snapshot["transition"]["to"] == "inside" {
                found = true;
            }
        }
    }
    assert!(found);
}

#[test]
fn test_region_and_overall_state() {
    let manager = started(config_with(0, 64, DebugVerbosity::Info));
    assert_eq!(manager.overall_state(), RegionState::Unknown);
    manager.ingest(ProximityEvent::region("R2", RegionState::Outside, 1));
    assert_eq!(manager.overall_state(), RegionState::Outside);
    manager.ingest(b1(RegionState::Inside, 2));
    assert_eq!(manager.region_state("R1"), RegionState::Inside);
    assert_eq!(manager.overall_state(), RegionState::Inside);
    assert_eq!(manager.region_state("nope"), RegionState::Unknown);
}

#[test]
fn test_debug_snapshot_contents() {
    let manager = started(config_with(5000, 64, DebugVerbosity::Info));
    manager.ingest(b1(RegionState::Inside, 10));
    let snapshot = manager.debug_snapshot();
    assert_eq!(snapshot["collecting"], true);
    assert_eq!(snapshot["debounce_window_ms"], 5000);
    assert_eq!(snapshot["keys"].as_array().unwrap().len(), 4);
    assert_eq!(snapshot["metrics"]["signals_ingested"], 1);
}

#[test]
fn test_track_action_event() {
    let manager = Manager::new(config_with(0, 64, DebugVerbosity::Info)).unwrap();
    let id = manager.track(TrackingEventType::Action, Some(serde_json::json!({"button": "claim"})));
    let events = manager.drain_tracking_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, id);
}

#[test]
fn test_invalid_configuration_rejected_at_construction() {
    let err = Configuration::builder().trigger_buffer_capacity(0).region(Region::new("R1")).build();
    assert!(err.is_err());
}
