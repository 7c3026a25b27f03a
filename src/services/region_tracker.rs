//! Region and beacon state tracking with debounce
//!
//! Every configured region has one region-level key plus one key per listed
//! beacon. Each key owns its own mutex, so signals for distinct keys never
//! contend. The key set is fixed at construction, so lookups need no outer
//! lock.
//!
//! A raw state change becomes a candidate. The candidate is confirmed once it
//! has held for the debounce window without reversal, and the resulting
//! transition is stamped `candidate_start + window`. Confirmation is observed
//! either by the next signal for that key or by `poll`.

use crate::domain::error::RuntimeError;
use crate::domain::types::{BeaconId, ProximityEvent, RegionId, RegionState, StateKey, Transition};
use crate::infra::config::Configuration;
use crate::infra::metrics::Metrics;
use crate::services::event_tracker::EventTracker;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    state: RegionState,
    since_ms: u64,
}

/// Outcome of feeding one raw signal into a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Older than the newest signal already seen
    Stale,
    Confirmed { from: RegionState, to: RegionState, at_ms: u64 },
    CandidateStarted(RegionState),
    /// A pending change was reversed inside the window
    CandidateReset,
    Unchanged,
}

/// Debounce state machine for a single key
#[derive(Debug, Default)]
struct KeyState {
    confirmed: RegionState,
    candidate: Option<Candidate>,
    last_signal_ms: Option<u64>,
}

impl KeyState {
    fn observe(&mut self, raw: RegionState, ts_ms: u64, window_ms: u64) -> Step {
        if matches!(self.last_signal_ms, Some(last) if ts_ms < last) {
            return Step::Stale;
        }
        self.last_signal_ms = Some(ts_ms);

        // A candidate that already held for the full window confirms first
        let mut step = match self.confirm_elapsed(ts_ms, window_ms) {
            Some((from, to, at_ms)) => Step::Confirmed { from, to, at_ms },
            None => Step::Unchanged,
        };

        match raw {
            // Unknown carries no information
            RegionState::Unknown => {}
            state if state == self.confirmed => {
                if self.candidate.take().is_some() && step == Step::Unchanged {
                    step = Step::CandidateReset;
                }
            }
            state => match self.candidate {
                Some(c) if c.state == state => {}
                _ => {
                    self.candidate = Some(Candidate { state, since_ms: ts_ms });
                    if step == Step::Unchanged {
                        step = match self.confirm_elapsed(ts_ms, window_ms) {
                            Some((from, to, at_ms)) => Step::Confirmed { from, to, at_ms },
                            None => Step::CandidateStarted(state),
                        };
                    }
                }
            },
        }
        step
    }

    /// Confirm the candidate if its window has elapsed by `now_ms`
    fn confirm_elapsed(&mut self, now_ms: u64, window_ms: u64) -> Option<(RegionState, RegionState, u64)> {
        let candidate = self.candidate?;
        let at_ms = candidate.since_ms.saturating_add(window_ms);
        if at_ms > now_ms {
            return None;
        }
        self.candidate = None;
        let from = self.confirmed;
        self.confirmed = candidate.state;
        Some((from, candidate.state, at_ms))
    }

    fn poll(&mut self, now_ms: u64, window_ms: u64) -> Option<(RegionState, RegionState, u64)> {
        let confirmed = self.confirm_elapsed(now_ms, window_ms)?;
        // Later signals older than the confirmation would reorder transitions
        self.last_signal_ms = Some(self.last_signal_ms.map_or(confirmed.2, |last| last.max(confirmed.2)));
        Some(confirmed)
    }
}

struct BeaconSlot {
    id: BeaconId,
    state: Mutex<KeyState>,
}

struct RegionSlots {
    id: RegionId,
    region: Mutex<KeyState>,
    beacons: Vec<BeaconSlot>,
}

impl RegionSlots {
    fn beacon(&self, beacon_id: &str) -> Option<&BeaconSlot> {
        self.beacons.iter().find(|b| b.id.as_str() == beacon_id)
    }
}

/// Serializable view of one key, used in debug snapshots
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub key: StateKey,
    pub state: RegionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<RegionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_since_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_signal_ms: Option<u64>,
}

/// Authoritative proximity state per region/beacon key
pub struct RegionStateTracker {
    slots: Vec<RegionSlots>,
    index: FxHashMap<RegionId, usize>,
    window_ms: u64,
    events: Arc<EventTracker>,
    metrics: Arc<Metrics>,
}

impl RegionStateTracker {
    pub fn new(config: &Configuration, events: Arc<EventTracker>, metrics: Arc<Metrics>) -> Self {
        let mut slots = Vec::with_capacity(config.regions().len());
        let mut index = FxHashMap::default();
        for (idx, region) in config.regions().iter().enumerate() {
            index.insert(region.id.clone(), idx);
            slots.push(RegionSlots {
                id: region.id.clone(),
                region: Mutex::new(KeyState::default()),
                beacons: region
                    .beacons
                    .iter()
                    .map(|id| BeaconSlot { id: id.clone(), state: Mutex::new(KeyState::default()) })
                    .collect(),
            });
        }
        Self { slots, index, window_ms: config.debounce_window_ms(), events, metrics }
    }

    /// Feed one raw signal; returns the transition it confirmed, if any
    pub fn ingest(&self, event: &ProximityEvent) -> Option<Transition> {
        self.ingest_with(event, |_| {})
    }

    /// Like `ingest`, running `on_transition` while the key is still locked
    ///
    /// Everything `on_transition` does is therefore ordered per key the same
    /// way transitions are.
    pub fn ingest_with<F>(&self, event: &ProximityEvent, on_transition: F) -> Option<Transition>
    where
        F: FnOnce(&Transition),
    {
        let Some(slots) = self.index.get(event.region_id.as_str()).map(|&i| &self.slots[i]) else {
            self.reject(RuntimeError::UnknownRegionSignal { region_id: event.region_id.clone() });
            return None;
        };

        let lock = match &event.beacon_id {
            None => &slots.region,
            Some(beacon_id) => match slots.beacon(beacon_id.as_str()) {
                Some(slot) => &slot.state,
                None => {
                    self.reject(RuntimeError::UnknownBeaconSignal {
                        region_id: event.region_id.clone(),
                        beacon_id: beacon_id.clone(),
                    });
                    return None;
                }
            },
        };

        let mut state = lock.lock();
        let step = state.observe(event.raw_state, event.timestamp_ms, self.window_ms);
        let key = event.key();
        match step {
            Step::Stale => {
                self.metrics.record_signal_stale();
                debug!(
                    key = %key,
                    timestamp_ms = %event.timestamp_ms,
                    last_signal_ms = ?state.last_signal_ms,
                    "stale_signal_ignored"
                );
                None
            }
            Step::CandidateStarted(candidate) => {
                debug!(key = %key, candidate = %candidate, since_ms = %event.timestamp_ms, "candidate_started");
                None
            }
            Step::CandidateReset => {
                self.metrics.record_candidate_reset();
                debug!(key = %key, state = %state.confirmed, "candidate_reset");
                None
            }
            Step::Unchanged => None,
            Step::Confirmed { from, to, at_ms } => {
                let transition = Transition {
                    region_id: event.region_id.clone(),
                    beacon_id: event.beacon_id.clone(),
                    from,
                    to,
                    timestamp_ms: at_ms,
                };
                self.log_transition(&transition);
                on_transition(&transition);
                Some(transition)
            }
        }
    }

    /// Confirm every candidate whose window elapsed by `now_ms`
    pub fn poll(&self, now_ms: u64) -> Vec<Transition> {
        self.poll_with(now_ms, |_| {})
    }

    /// Like `poll`, running `on_transition` under each key's lock
    pub fn poll_with<F>(&self, now_ms: u64, mut on_transition: F) -> Vec<Transition>
    where
        F: FnMut(&Transition),
    {
        let mut transitions = Vec::new();
        for slots in &self.slots {
            let keys = std::iter::once((None, &slots.region))
                .chain(slots.beacons.iter().map(|b| (Some(&b.id), &b.state)));
            for (beacon_id, lock) in keys {
                let mut state = lock.lock();
                if let Some((from, to, at_ms)) = state.poll(now_ms, self.window_ms) {
                    let transition = Transition {
                        region_id: slots.id.clone(),
                        beacon_id: beacon_id.cloned(),
                        from,
                        to,
                        timestamp_ms: at_ms,
                    };
                    self.log_transition(&transition);
                    on_transition(&transition);
                    transitions.push(transition);
                }
            }
        }
        transitions
    }

    /// Confirmed state of one key; Unknown for unconfigured keys
    pub fn current_state(&self, region_id: &str, beacon_id: Option<&str>) -> RegionState {
        let Some(slots) = self.slots_for(region_id) else {
            return RegionState::Unknown;
        };
        match beacon_id {
            None => slots.region.lock().confirmed,
            Some(beacon_id) => {
                slots.beacon(beacon_id).map_or(RegionState::Unknown, |slot| slot.state.lock().confirmed)
            }
        }
    }

    /// Aggregate state of a region
    ///
    /// The region-level key wins once it is known. Otherwise the region is
    /// Inside if any beacon is Inside, Outside if any beacon is Outside.
    pub fn region_state(&self, region_id: &str) -> RegionState {
        let Some(slots) = self.slots_for(region_id) else {
            return RegionState::Unknown;
        };
        let region_level = slots.region.lock().confirmed;
        if region_level != RegionState::Unknown {
            return region_level;
        }
        let beacon_states: Vec<RegionState> = slots.beacons.iter().map(|b| b.state.lock().confirmed).collect();
        aggregate(beacon_states)
    }

    /// Aggregate state over all regions
    pub fn overall_state(&self) -> RegionState {
        aggregate(self.slots.iter().map(|s| self.region_state(s.id.as_str())))
    }

    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        let mut out = Vec::new();
        for slots in &self.slots {
            out.push(key_snapshot(StateKey::region(slots.id.clone()), &slots.region.lock()));
            for beacon in &slots.beacons {
                out.push(key_snapshot(
                    StateKey::beacon(slots.id.clone(), beacon.id.clone()),
                    &beacon.state.lock(),
                ));
            }
        }
        out
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn slots_for(&self, region_id: &str) -> Option<&RegionSlots> {
        self.index.get(region_id).map(|&i| &self.slots[i])
    }

    fn log_transition(&self, transition: &Transition) {
        self.metrics.record_transition();
        info!(
            region_id = %transition.region_id,
            beacon_id = ?transition.beacon_id.as_ref().map(BeaconId::as_str),
            from = %transition.from,
            to = %transition.to,
            timestamp_ms = %transition.timestamp_ms,
            "transition_confirmed"
        );
    }

    fn reject(&self, err: RuntimeError) {
        self.metrics.record_unknown_signal();
        warn!(error = %err, kind = err.kind(), "signal_rejected");
        self.events.record_error(&err);
    }
}

fn aggregate(states: impl IntoIterator<Item = RegionState>) -> RegionState {
    let mut any_outside = false;
    for state in states {
        match state {
            RegionState::Inside => return RegionState::Inside,
            RegionState::Outside => any_outside = true,
            RegionState::Unknown => {}
        }
    }
    if any_outside {
        RegionState::Outside
    } else {
        RegionState::Unknown
    }
}

fn key_snapshot(key: StateKey, state: &KeyState) -> KeySnapshot {
    KeySnapshot {
        key,
        state: state.confirmed,
        candidate: state.candidate.map(|c| c.state),
        candidate_since_ms: state.candidate.map(|c| c.since_ms),
        last_signal_ms: state.last_signal_ms,
    }
}
