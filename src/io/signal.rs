//! Signal ingestion boundary - JSONL proximity records
//!
//! One JSON object per line:
//! `{"region":"R1","beacon":"B1","state":1,"timestamp":1700000000000}`
//!
//! `state` is either a platform code (0 unknown, 1 inside, 2 outside) or a
//! state name. `timestamp` is epoch milliseconds or an RFC 3339 string.
//! Platform codes are translated here; the core only sees `RegionState`.

use crate::domain::types::{ProximityEvent, RegionState};
use serde::{Deserialize, Deserializer};
use std::io::{self, BufRead};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const PLATFORM_STATE_UNKNOWN: i64 = 0;
pub const PLATFORM_STATE_INSIDE: i64 = 1;
pub const PLATFORM_STATE_OUTSIDE: i64 = 2;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("line {line}: malformed signal record: {source}")]
    Json { line: usize, source: serde_json::Error },

    #[error("line {line}: unrecognized state {value}")]
    InvalidState { line: usize, value: String },

    #[error("line {line}: unparseable timestamp {value:?}")]
    InvalidTimestamp { line: usize, value: String },

    #[error("line {line}: missing timestamp")]
    MissingTimestamp { line: usize },

    #[error("failed to read signals: {0}")]
    Io(#[from] io::Error),
}

/// State as delivered by the platform: numeric code or name
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawStateValue {
    Code(i64),
    Name(String),
}

/// Timestamp that can be either RFC 3339 string or epoch milliseconds
#[derive(Debug, Clone, Default)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalRecord {
    #[serde(alias = "regionId")]
    pub region: String,
    #[serde(default, alias = "beaconId")]
    pub beacon: Option<String>,
    pub state: RawStateValue,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: TimestampValue,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(TimestampValue::EpochMs)
                .map_err(|_| E::custom("negative timestamp"))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Translate a platform state code
pub fn state_from_code(code: i64) -> Option<RegionState> {
    match code {
        PLATFORM_STATE_UNKNOWN => Some(RegionState::Unknown),
        PLATFORM_STATE_INSIDE => Some(RegionState::Inside),
        PLATFORM_STATE_OUTSIDE => Some(RegionState::Outside),
        _ => None,
    }
}

fn state_from_name(name: &str) -> Option<RegionState> {
    match name.to_ascii_lowercase().as_str() {
        "unknown" => Some(RegionState::Unknown),
        "inside" => Some(RegionState::Inside),
        "outside" => Some(RegionState::Outside),
        _ => None,
    }
}

/// Parse RFC 3339 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

impl SignalRecord {
    /// Convert into a core event; `line` is only used for error reporting
    pub fn into_event(self, line: usize) -> Result<ProximityEvent, SignalError> {
        let raw_state = match &self.state {
            RawStateValue::Code(code) => state_from_code(*code),
            RawStateValue::Name(name) => state_from_name(name),
        }
        .ok_or_else(|| SignalError::InvalidState {
            line,
            value: match &self.state {
                RawStateValue::Code(code) => code.to_string(),
                RawStateValue::Name(name) => name.clone(),
            },
        })?;

        let timestamp_ms = match self.timestamp {
            TimestampValue::EpochMs(ms) => ms,
            TimestampValue::IsoString(s) => {
                parse_iso_time(&s).ok_or(SignalError::InvalidTimestamp { line, value: s })?
            }
            TimestampValue::None => return Err(SignalError::MissingTimestamp { line }),
        };

        Ok(ProximityEvent {
            region_id: self.region.into(),
            beacon_id: self.beacon.map(Into::into),
            raw_state,
            timestamp_ms,
        })
    }
}

/// Parse one JSONL line; blank lines and `#` comments yield `None`
pub fn parse_signal_line(text: &str, line: usize) -> Result<Option<ProximityEvent>, SignalError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let record: SignalRecord =
        serde_json::from_str(trimmed).map_err(|source| SignalError::Json { line, source })?;
    record.into_event(line).map(Some)
}

/// Iterator over the signals of a JSONL stream, one result per record
pub struct SignalReader<R> {
    lines: io::Lines<R>,
    line: usize,
}

impl<R: BufRead> SignalReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), line: 0 }
    }
}

impl<R: BufRead> Iterator for SignalReader<R> {
    type Item = Result<ProximityEvent, SignalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(SignalError::Io(e))),
            };
            self.line += 1;
            match parse_signal_line(&text, self.line) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
