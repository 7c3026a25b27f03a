//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. BEACON_CONFIG environment variable
//! 3. Default: config/beacons.toml
//!
//! Every construction path (`from_toml_str`, `from_file`, the builder)
//! validates, so a `Configuration` value is always usable by the manager.

use crate::domain::region::{Region, TriggerEvent, TriggerRule};
use crate::domain::trigger::{PayloadValue, RESERVED_KEYS};
use crate::domain::types::{BeaconId, RegionId};
use anyhow::Context;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 5000;
pub const DEFAULT_TRIGGER_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_TRACKING_BUFFER_CAPACITY: usize = 256;

/// How much the debug channel receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugVerbosity {
    /// Nothing is forwarded
    Off,
    /// Error tracking events only
    Error,
    /// All tracking events and snapshots
    #[default]
    Info,
    /// Everything, plus one diagnostic snapshot per confirmed transition
    Verbose,
}

impl DebugVerbosity {
    pub fn forwards_event(&self, is_error: bool) -> bool {
        match self {
            DebugVerbosity::Off => false,
            DebugVerbosity::Error => is_error,
            DebugVerbosity::Info | DebugVerbosity::Verbose => true,
        }
    }

    pub fn forwards_snapshots(&self) -> bool {
        *self >= DebugVerbosity::Info
    }

    pub fn forwards_diagnostics(&self) -> bool {
        *self == DebugVerbosity::Verbose
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("configuration defines no regions")]
    NoRegions,

    #[error("region id must not be empty")]
    EmptyRegionId,

    #[error("region {0} is defined more than once")]
    DuplicateRegion(RegionId),

    #[error("region {0} lists an empty beacon id")]
    EmptyBeaconId(RegionId),

    #[error("beacon {beacon_id} is listed twice in region {region_id}")]
    DuplicateBeacon { region_id: RegionId, beacon_id: BeaconId },

    #[error("rule in region {region_id} references beacon {beacon_id} which the region does not list")]
    UnknownRuleBeacon { region_id: RegionId, beacon_id: BeaconId },

    #[error("region {region_id} has more than one {event} rule for {scope}")]
    ConflictingRules { region_id: RegionId, event: TriggerEvent, scope: String },

    #[error("rule extra key {key:?} in region {region_id} collides with a built-in payload key")]
    ReservedExtraKey { region_id: RegionId, key: String },

    #[error("{field} must be greater than zero")]
    ZeroCapacity { field: &'static str },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlRule {
    pub on: TriggerEvent,
    /// Beacon the rule is scoped to; absent means region-level
    #[serde(default)]
    pub beacon: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, PayloadValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlRegion {
    pub id: String,
    #[serde(default)]
    pub beacons: Vec<String>,
    #[serde(default)]
    pub rules: Vec<TomlRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,
    #[serde(default = "default_trigger_buffer_capacity")]
    pub trigger_buffer_capacity: usize,
    #[serde(default = "default_tracking_buffer_capacity")]
    pub tracking_buffer_capacity: usize,
    #[serde(default)]
    pub debug_verbosity: DebugVerbosity,
    #[serde(default)]
    pub regions: Vec<TomlRegion>,
}

fn default_debounce_window_ms() -> u64 {
    DEFAULT_DEBOUNCE_WINDOW_MS
}

fn default_trigger_buffer_capacity() -> usize {
    DEFAULT_TRIGGER_BUFFER_CAPACITY
}

fn default_tracking_buffer_capacity() -> usize {
    DEFAULT_TRACKING_BUFFER_CAPACITY
}

impl From<TomlRegion> for Region {
    fn from(raw: TomlRegion) -> Self {
        let mut region = Region::new(raw.id);
        for beacon in raw.beacons {
            region = region.with_beacon(beacon);
        }
        for rule in raw.rules {
            region = region.with_rule(TriggerRule {
                event: rule.on,
                beacon_id: rule.beacon.map(BeaconId::from),
                extras: rule.extras,
            });
        }
        region
    }
}

/// Immutable, validated configuration shared by the manager's components
#[derive(Debug, Clone)]
pub struct Configuration {
    debounce_window_ms: u64,
    trigger_buffer_capacity: usize,
    tracking_buffer_capacity: usize,
    debug_verbosity: DebugVerbosity,
    regions: Vec<Region>,
    region_index: FxHashMap<RegionId, usize>,
    config_file: String,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("BEACON_CONFIG") {
            return path;
        }

        "config/beacons.toml".to_string()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        let raw: TomlConfig = toml::from_str(content)?;
        Self::from_raw(raw, "inline".to_string())
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let raw: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        let config = Self::from_raw(raw, path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    fn from_raw(raw: TomlConfig, config_file: String) -> Result<Self, ConfigurationError> {
        ConfigurationBuilder {
            debounce_window_ms: raw.debounce_window_ms,
            trigger_buffer_capacity: raw.trigger_buffer_capacity,
            tracking_buffer_capacity: raw.tracking_buffer_capacity,
            debug_verbosity: raw.debug_verbosity,
            regions: raw.regions.into_iter().map(Region::from).collect(),
            config_file,
        }
        .build()
    }

    /// Re-run validation; every constructor already does this
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_parts(
            &self.regions,
            self.trigger_buffer_capacity,
            self.tracking_buffer_capacity,
        )
        .map(|_| ())
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.region_index.get(id).map(|&idx| &self.regions[idx])
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn debounce_window_ms(&self) -> u64 {
        self.debounce_window_ms
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn trigger_buffer_capacity(&self) -> usize {
        self.trigger_buffer_capacity
    }

    pub fn tracking_buffer_capacity(&self) -> usize {
        self.tracking_buffer_capacity
    }

    pub fn debug_verbosity(&self) -> DebugVerbosity {
        self.debug_verbosity
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

/// Programmatic construction, validated by `build()`
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    debounce_window_ms: u64,
    trigger_buffer_capacity: usize,
    tracking_buffer_capacity: usize,
    debug_verbosity: DebugVerbosity,
    regions: Vec<Region>,
    config_file: String,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            trigger_buffer_capacity: DEFAULT_TRIGGER_BUFFER_CAPACITY,
            tracking_buffer_capacity: DEFAULT_TRACKING_BUFFER_CAPACITY,
            debug_verbosity: DebugVerbosity::default(),
            regions: Vec::new(),
            config_file: "builder".to_string(),
        }
    }
}

impl ConfigurationBuilder {
    pub fn debounce_window_ms(mut self, ms: u64) -> Self {
        self.debounce_window_ms = ms;
        self
    }

    pub fn trigger_buffer_capacity(mut self, capacity: usize) -> Self {
        self.trigger_buffer_capacity = capacity;
        self
    }

    pub fn tracking_buffer_capacity(mut self, capacity: usize) -> Self {
        self.tracking_buffer_capacity = capacity;
        self
    }

    pub fn debug_verbosity(mut self, verbosity: DebugVerbosity) -> Self {
        self.debug_verbosity = verbosity;
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    pub fn build(self) -> Result<Configuration, ConfigurationError> {
        let region_index = validate_parts(
            &self.regions,
            self.trigger_buffer_capacity,
            self.tracking_buffer_capacity,
        )?;
        Ok(Configuration {
            debounce_window_ms: self.debounce_window_ms,
            trigger_buffer_capacity: self.trigger_buffer_capacity,
            tracking_buffer_capacity: self.tracking_buffer_capacity,
            debug_verbosity: self.debug_verbosity,
            regions: self.regions,
            region_index,
            config_file: self.config_file,
        })
    }
}

/// Check structural invariants and build the region lookup index
fn validate_parts(
    regions: &[Region],
    trigger_capacity: usize,
    tracking_capacity: usize,
) -> Result<FxHashMap<RegionId, usize>, ConfigurationError> {
    if trigger_capacity == 0 {
        return Err(ConfigurationError::ZeroCapacity { field: "trigger_buffer_capacity" });
    }
    if tracking_capacity == 0 {
        return Err(ConfigurationError::ZeroCapacity { field: "tracking_buffer_capacity" });
    }
    if regions.is_empty() {
        return Err(ConfigurationError::NoRegions);
    }

    let mut index = FxHashMap::default();
    for (idx, region) in regions.iter().enumerate() {
        if region.id.as_str().is_empty() {
            return Err(ConfigurationError::EmptyRegionId);
        }
        if index.insert(region.id.clone(), idx).is_some() {
            return Err(ConfigurationError::DuplicateRegion(region.id.clone()));
        }

        let mut beacons = FxHashSet::default();
        for beacon in &region.beacons {
            if beacon.as_str().is_empty() {
                return Err(ConfigurationError::EmptyBeaconId(region.id.clone()));
            }
            if !beacons.insert(beacon) {
                return Err(ConfigurationError::DuplicateBeacon {
                    region_id: region.id.clone(),
                    beacon_id: beacon.clone(),
                });
            }
        }

        let mut seen_rules = FxHashSet::default();
        for rule in &region.rules {
            if let Some(beacon) = &rule.beacon_id {
                if !beacons.contains(beacon) {
                    return Err(ConfigurationError::UnknownRuleBeacon {
                        region_id: region.id.clone(),
                        beacon_id: beacon.clone(),
                    });
                }
            }
            if !seen_rules.insert((rule.beacon_id.as_ref(), rule.event)) {
                let scope = match &rule.beacon_id {
                    Some(beacon) => format!("beacon {beacon}"),
                    None => "the region".to_string(),
                };
                return Err(ConfigurationError::ConflictingRules {
                    region_id: region.id.clone(),
                    event: rule.event,
                    scope,
                });
            }
            if let Some(key) = rule.extras.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
                return Err(ConfigurationError::ReservedExtraKey {
                    region_id: region.id.clone(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(index)
}
