//! Trigger assembly - confirmed transitions to backend payloads
//!
//! Pure and synchronous. The same transition and configuration always
//! produce the same payload, byte for byte.

use crate::domain::region::TriggerRule;
use crate::domain::trigger::{
    TriggerRequest, KEY_BEACON_ID, KEY_EVENT_TYPE, KEY_REGION_ID, KEY_TIMESTAMP,
};
use crate::domain::types::Transition;
use crate::infra::config::Configuration;
use std::sync::Arc;

/// Build the trigger payload for a transition, if a rule matches
///
/// Key order: `regionId`, `beaconId` (beacon transitions only), `eventType`,
/// `timestamp`, then the rule's extras sorted by key.
pub fn assemble(transition: &Transition, config: &Configuration) -> Option<TriggerRequest> {
    let region = config.region(transition.region_id.as_str())?;
    let rule = region.matching_rule(transition)?;
    Some(build_request(transition, rule))
}

fn build_request(transition: &Transition, rule: &TriggerRule) -> TriggerRequest {
    let mut request = TriggerRequest::new();
    request.insert(KEY_REGION_ID, transition.region_id.as_str());
    if let Some(beacon_id) = &transition.beacon_id {
        request.insert(KEY_BEACON_ID, beacon_id.as_str());
    }
    request.insert(KEY_EVENT_TYPE, rule.event.as_str());
    request.insert(KEY_TIMESTAMP, transition.timestamp_ms);
    // BTreeMap iteration is already sorted by key
    for (key, value) in &rule.extras {
        request.insert(key, value.clone());
    }
    request
}

/// Assembler bound to one configuration
#[derive(Debug, Clone)]
pub struct TriggerAssembler {
    config: Arc<Configuration>,
}

impl TriggerAssembler {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self { config }
    }

    pub fn assemble(&self, transition: &Transition) -> Option<TriggerRequest> {
        assemble(transition, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::region::{Region, TriggerRule};
    use crate::domain::trigger::PayloadValue;
    use crate::domain::types::RegionState;

    fn config() -> Configuration {
        Configuration::builder()
            .region(
                Region::new("R1")
                    .with_beacon("B1")
                    .with_rule(
                        TriggerRule::on_enter()
                            .for_beacon("B1")
                            .with_extra("zeta", "last")
                            .with_extra("alpha", 1i64),
                    )
                    .with_rule(TriggerRule::on_exit()),
            )
            .build()
            .unwrap()
    }

    fn transition(beacon: Option<&str>, from: RegionState, to: RegionState, ts: u64) -> Transition {
        Transition { region_id: "R1".into(), beacon_id: beacon.map(Into::into), from, to, timestamp_ms: ts }
    }

    #[test]
    fn test_enter_payload_shape() {
        let config = config();
        let request =
            assemble(&transition(Some("B1"), RegionState::Unknown, RegionState::Inside, 5000), &config)
                .unwrap();
        let keys: Vec<&str> = request.keys().collect();
        assert_eq!(keys, vec!["regionId", "beaconId", "eventType", "timestamp", "alpha", "zeta"]);
        assert_eq!(request.get("alpha"), Some(&PayloadValue::Integer(1)));
        assert_eq!(
            request.to_json(),
            r#"{"regionId":"R1","beaconId":"B1","eventType":"enter","timestamp":5000,"alpha":1,"zeta":"last"}"#
        );
    }

    #[test]
    fn test_region_level_exit_omits_beacon() {
        let config = config();
        let request =
            assemble(&transition(None, RegionState::Inside, RegionState::Outside, 9000), &config).unwrap();
        assert_eq!(request.beacon_id(), None);
        assert_eq!(request.event_type(), Some("exit"));
        assert_eq!(request.to_json(), r#"{"regionId":"R1","eventType":"exit","timestamp":9000}"#);
    }

    #[test]
    fn test_unmatched_transitions_dropped() {
        let config = config();
        // No exit rule for B1, no enter rule at region level
        assert!(assemble(&transition(Some("B1"), RegionState::Inside, RegionState::Outside, 1), &config).is_none());
        assert!(assemble(&transition(None, RegionState::Outside, RegionState::Inside, 1), &config).is_none());
        // Unknown -> Outside is neither enter nor exit
        assert!(assemble(&transition(None, RegionState::Unknown, RegionState::Outside, 1), &config).is_none());
    }

    #[test]
    fn test_unknown_region_dropped() {
        let config = config();
        let mut t = transition(None, RegionState::Inside, RegionState::Outside, 1);
        t.region_id = "R9".into();
        assert!(assemble(&t, &config).is_none());
    }

    #[test]
    fn test_deterministic_bytes() {
        let assembler = TriggerAssembler::new(Arc::new(config()));
        let t = transition(Some("B1"), RegionState::Outside, RegionState::Inside, 123);
        let a = assembler.assemble(&t).unwrap().to_json_bytes();
        let b = assembler.assemble(&t).unwrap().to_json_bytes();
        assert_eq!(a, b);
    }
}
