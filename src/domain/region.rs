//! Regions, beacons and the trigger rules attached to them

use crate::domain::trigger::PayloadValue;
use crate::domain::types::{BeaconId, RegionId, RegionState, Transition};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// A physical beacon and the region it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Beacon {
    pub id: BeaconId,
    pub region_id: RegionId,
}

/// Which side of a region boundary a rule fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEvent {
    Enter,
    Exit,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Enter => "enter",
            TriggerEvent::Exit => "exit",
        }
    }

    /// Whether a `from -> to` change counts as this event
    ///
    /// Enter accepts a first sighting (`Unknown -> Inside`) as well as
    /// `Outside -> Inside`. Exit requires having been inside.
    pub fn matches(&self, from: RegionState, to: RegionState) -> bool {
        match self {
            TriggerEvent::Enter => to == RegionState::Inside && from != RegionState::Inside,
            TriggerEvent::Exit => from == RegionState::Inside && to == RegionState::Outside,
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule turning a confirmed transition into a trigger
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRule {
    pub event: TriggerEvent,
    /// `None` matches region-level transitions only
    pub beacon_id: Option<BeaconId>,
    /// Extra payload fields, emitted sorted by key
    pub extras: BTreeMap<String, PayloadValue>,
}

impl TriggerRule {
    pub fn on_enter() -> Self {
        Self { event: TriggerEvent::Enter, beacon_id: None, extras: BTreeMap::new() }
    }

    pub fn on_exit() -> Self {
        Self { event: TriggerEvent::Exit, beacon_id: None, extras: BTreeMap::new() }
    }

    pub fn for_beacon(mut self, beacon_id: impl Into<BeaconId>) -> Self {
        self.beacon_id = Some(beacon_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, transition: &Transition) -> bool {
        self.beacon_id == transition.beacon_id && self.event.matches(transition.from, transition.to)
    }
}

/// A monitored region: its beacons and trigger rules
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub beacons: SmallVec<[BeaconId; 4]>,
    pub rules: Vec<TriggerRule>,
}

impl Region {
    pub fn new(id: impl Into<RegionId>) -> Self {
        Self { id: id.into(), beacons: SmallVec::new(), rules: Vec::new() }
    }

    pub fn with_beacon(mut self, beacon_id: impl Into<BeaconId>) -> Self {
        self.beacons.push(beacon_id.into());
        self
    }

    pub fn with_rule(mut self, rule: TriggerRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn has_beacon(&self, beacon_id: &BeaconId) -> bool {
        self.beacons.contains(beacon_id)
    }

    /// Beacons of this region, in configuration order
    pub fn beacon_list(&self) -> impl Iterator<Item = Beacon> + '_ {
        self.beacons.iter().map(|id| Beacon { id: id.clone(), region_id: self.id.clone() })
    }

    /// First rule matching the transition, if any
    pub fn matching_rule(&self, transition: &Transition) -> Option<&TriggerRule> {
        self.rules.iter().find(|rule| rule.matches(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(beacon: Option<&str>, from: RegionState, to: RegionState) -> Transition {
        Transition {
            region_id: "R1".into(),
            beacon_id: beacon.map(BeaconId::from),
            from,
            to,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_enter_matches_first_sighting_and_reentry() {
        assert!(TriggerEvent::Enter.matches(RegionState::Unknown, RegionState::Inside));
        assert!(TriggerEvent::Enter.matches(RegionState::Outside, RegionState::Inside));
        assert!(!TriggerEvent::Enter.matches(RegionState::Inside, RegionState::Outside));
        assert!(!TriggerEvent::Enter.matches(RegionState::Unknown, RegionState::Outside));
    }

    #[test]
    fn test_exit_requires_inside() {
        assert!(TriggerEvent::Exit.matches(RegionState::Inside, RegionState::Outside));
        assert!(!TriggerEvent::Exit.matches(RegionState::Unknown, RegionState::Outside));
        assert!(!TriggerEvent::Exit.matches(RegionState::Outside, RegionState::Inside));
    }

    #[test]
    fn test_rule_scope_region_vs_beacon() {
        let region_rule = TriggerRule::on_enter();
        let beacon_rule = TriggerRule::on_enter().for_beacon("B1");

        let region_t = transition(None, RegionState::Unknown, RegionState::Inside);
        let beacon_t = transition(Some("B1"), RegionState::Unknown, RegionState::Inside);
        let other_t = transition(Some("B2"), RegionState::Unknown, RegionState::Inside);

        assert!(region_rule.matches(&region_t));
        assert!(!region_rule.matches(&beacon_t));
        assert!(beacon_rule.matches(&beacon_t));
        assert!(!beacon_rule.matches(&other_t));
        assert!(!beacon_rule.matches(&region_t));
    }

    #[test]
    fn test_region_matching_rule_picks_event() {
        let region = Region::new("R1")
            .with_beacon("B1")
            .with_rule(TriggerRule::on_enter().for_beacon("B1"))
            .with_rule(TriggerRule::on_exit().for_beacon("B1").with_extra("zone", "lobby"));

        let exit = transition(Some("B1"), RegionState::Inside, RegionState::Outside);
        let rule = region.matching_rule(&exit).unwrap();
        assert_eq!(rule.event, TriggerEvent::Exit);
        assert_eq!(rule.extras["zone"], PayloadValue::from("lobby"));
        assert!(region.has_beacon(&BeaconId::from("B1")));

        let beacons: Vec<Beacon> = region.beacon_list().collect();
        assert_eq!(beacons.len(), 1);
        assert_eq!(beacons[0].region_id.as_str(), "R1");
    }
}
