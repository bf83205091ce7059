//! Canonical event model and request-level normalization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_SOURCE: &str = "hermes";
pub const DEFAULT_SOURCE_TYPE: &str = "json";
pub const DEFAULT_INDEX: &str = "main";

/// One unit of telemetry, in the shape HEC expects on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "event")]
    pub payload: Map<String, Value>,
    #[serde(rename = "time")]
    pub timestamp_ms: i64,
    pub host: String,
    pub source: String,
    #[serde(rename = "sourcetype")]
    pub source_type: String,
    pub index: String,
}

impl Event {
    /// Encode as a single HEC line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Request-level overrides. Empty strings mean "not provided".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestDefaults {
    pub host: String,
    pub source: String,
    pub source_type: String,
    pub index: String,
}

/// Build an [`Event`] from a raw record.
///
/// Never fails: anything unusable falls back to a default.
pub fn normalize(record: Map<String, Value>, defaults: &RequestDefaults, remote_addr: &str) -> Event {
    let timestamp_ms = resolve_timestamp(record.get("time"));

    Event {
        payload: record,
        timestamp_ms,
        host: or_default(&defaults.host, remote_addr),
        source: or_default(&defaults.source, DEFAULT_SOURCE),
        source_type: or_default(&defaults.source_type, DEFAULT_SOURCE_TYPE),
        index: or_default(&defaults.index, DEFAULT_INDEX),
    }
}

/// Resolve a record's `time` field to epoch milliseconds.
///
/// Precedence: integer string, RFC3339 string, JSON integer, then now.
pub fn resolve_timestamp(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::String(s)) => {
            if let Ok(ms) = s.parse::<i64>() {
                return ms;
            }
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return ts.timestamp_millis();
            }
            current_timestamp_ms()
        }
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(current_timestamp_ms),
        _ => current_timestamp_ms(),
    }
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
