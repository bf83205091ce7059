//! Request and response bodies of the HTTP API

use crate::event::RequestDefaults;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /api/post`.
///
/// Absent and `null` fields are both read as their empty default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Map<String, Value>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PostRequest {
    pub fn defaults(&self) -> RequestDefaults {
        RequestDefaults {
            host: self.host.clone(),
            source: self.source.clone(),
            source_type: self.source_type.clone(),
            index: self.index.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResponse {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
}

impl PingResponse {
    pub fn now() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Events already enqueued when the request failed part way through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            accepted: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_fields_read_as_defaults() {
        let request: PostRequest = serde_json::from_str(
            r#"{"events":[{"msg":"x"}],"host":null,"source":null,"source_type":null,"index":null}"#,
        )
        .unwrap();

        assert_eq!(request.events.len(), 1);
        let defaults = request.defaults();
        assert_eq!(defaults.host, "");
        assert_eq!(defaults.source, "");
        assert_eq!(defaults.index, "");

        let request: PostRequest = serde_json::from_str(r#"{"events":null}"#).unwrap();
        assert!(request.events.is_empty());
    }

    #[test]
    fn test_wrong_types_are_still_rejected() {
        assert!(serde_json::from_str::<PostRequest>(r#"{"events":[],"host":7}"#).is_err());
        assert!(serde_json::from_str::<PostRequest>(r#"{"events":{}}"#).is_err());
    }

    #[test]
    fn test_error_response_omits_missing_accepted_count() {
        let body = serde_json::to_value(ErrorResponse::new("queue closed")).unwrap();
        assert_eq!(body, serde_json::json!({"error": "queue closed"}));
    }
}
