//! Serializable projection of a guard's mutable state
//!
//! The persisted form is a flat JSON object:
//!
//! ```text
//! {
//!   "state": "open",                       // closed | open | half_open
//!   "failure_count": 5,
//!   "half_open_call_count": 0,
//!   "half_open_success_count": 0,
//!   "last_failure_time": "2026-01-01T00:00:00Z",   // or null
//!   "next_attempt_time": "2026-01-01T00:01:00Z",   // or null
//!   "last_updated": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! Every coordinator backend stores exactly this shape, so workers built
//! against different backends can share state.

use crate::error::SnapshotError;
use crate::state::CircuitState;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

const STATE: &str = "state";
const FAILURE_COUNT: &str = "failure_count";
const HALF_OPEN_CALL_COUNT: &str = "half_open_call_count";
const HALF_OPEN_SUCCESS_COUNT: &str = "half_open_success_count";
const LAST_FAILURE_TIME: &str = "last_failure_time";
const NEXT_ATTEMPT_TIME: &str = "next_attempt_time";
const LAST_UPDATED: &str = "last_updated";

/// Guard state at an instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_call_count: u32,
    pub half_open_success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl StateSnapshot {
    /// Snapshot of a guard that has never failed
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_call_count: 0,
            half_open_success_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            last_updated: now,
        }
    }

    /// Encode as a flat field mapping
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(STATE.into(), Value::from(self.state.as_str()));
        map.insert(FAILURE_COUNT.into(), Value::from(self.failure_count));
        map.insert(
            HALF_OPEN_CALL_COUNT.into(),
            Value::from(self.half_open_call_count),
        );
        map.insert(
            HALF_OPEN_SUCCESS_COUNT.into(),
            Value::from(self.half_open_success_count),
        );
        map.insert(
            LAST_FAILURE_TIME.into(),
            self.last_failure_time.map_or(Value::Null, encode_time),
        );
        map.insert(
            NEXT_ATTEMPT_TIME.into(),
            self.next_attempt_time.map_or(Value::Null, encode_time),
        );
        map.insert(LAST_UPDATED.into(), encode_time(self.last_updated));
        map
    }

    /// Decode from a flat field mapping
    ///
    /// Unknown keys are ignored. Cross-field invariants (e.g. a next attempt
    /// time only while open) are the producer's responsibility.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, SnapshotError> {
        let token = required(map, STATE)?
            .as_str()
            .ok_or_else(|| invalid(STATE, "expected a string token"))?;

        Ok(Self {
            state: token.parse()?,
            failure_count: decode_count(map, FAILURE_COUNT)?,
            half_open_call_count: decode_count(map, HALF_OPEN_CALL_COUNT)?,
            half_open_success_count: decode_count(map, HALF_OPEN_SUCCESS_COUNT)?,
            last_failure_time: decode_optional_time(map, LAST_FAILURE_TIME)?,
            next_attempt_time: decode_optional_time(map, NEXT_ATTEMPT_TIME)?,
            last_updated: decode_time(LAST_UPDATED, required(map, LAST_UPDATED)?)?,
        })
    }

    /// Encode as a JSON document
    pub fn to_json(&self) -> String {
        Value::Object(self.to_map()).to_string()
    }

    /// Decode from a JSON document
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self::from_map(&map),
            Ok(_) => Err(SnapshotError::Json("expected a JSON object".to_string())),
            Err(e) => Err(SnapshotError::Json(e.to_string())),
        }
    }
}

fn encode_time(time: DateTime<Utc>) -> Value {
    Value::from(time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SnapshotError {
    SnapshotError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn required<'a>(map: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, SnapshotError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(SnapshotError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn decode_count(map: &Map<String, Value>, field: &'static str) -> Result<u32, SnapshotError> {
    let value = required(map, field)?;
    let n = value
        .as_u64()
        .ok_or_else(|| invalid(field, format!("expected a non-negative integer, got {}", value)))?;
    u32::try_from(n).map_err(|_| invalid(field, format!("{} is out of range", n)))
}

fn decode_time(field: &'static str, value: &Value) -> Result<DateTime<Utc>, SnapshotError> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(field, "expected an RFC 3339 timestamp string"))?;
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| invalid(field, format!("'{}': {}", text, e)))
}

fn decode_optional_time(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, SnapshotError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decode_time(field, value).map(Some),
    }
}
