//! Error types for the event forwarder

use std::fmt;

pub type Result<T> = std::result::Result<T, HermesError>;

#[derive(Debug)]
pub enum HermesError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request to the collector failed
    Http(reqwest::Error),

    /// Event could not be encoded
    Serialization(serde_json::Error),

    /// Missing or invalid configuration
    Config(String),

    /// Request could not be built or did not complete
    Transport(String),

    /// The consumer side of the ingest queue is gone
    QueueClosed,
}

impl HermesError {
    /// Whether the consumer can be resumed after this error.
    ///
    /// A configuration problem will fail every subsequent delivery the same
    /// way, so the supervisor gives up on it.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, HermesError::Config(_) | HermesError::QueueClosed)
    }
}

impl fmt::Display for HermesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HermesError::Io(err) => write!(f, "IO error: {}", err),
            HermesError::Http(err) => write!(f, "HTTP error: {}", err),
            HermesError::Serialization(err) => write!(f, "Serialization error: {}", err),
            HermesError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HermesError::Transport(msg) => write!(f, "Transport error: {}", msg),
            HermesError::QueueClosed => write!(f, "Ingest queue closed"),
        }
    }
}

impl std::error::Error for HermesError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HermesError::Io(err) => Some(err),
            HermesError::Http(err) => Some(err),
            HermesError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HermesError {
    fn from(err: std::io::Error) -> Self {
        HermesError::Io(err)
    }
}

impl From<reqwest::Error> for HermesError {
    fn from(err: reqwest::Error) -> Self {
        HermesError::Http(err)
    }
}

impl From<serde_json::Error> for HermesError {
    fn from(err: serde_json::Error) -> Self {
        HermesError::Serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_not_recoverable() {
        let err = HermesError::Config("SPLUNK_TOKEN is not set".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Configuration error: SPLUNK_TOKEN is not set");
    }

    #[test]
    fn test_transport_errors_are_recoverable() {
        let err = HermesError::Transport("Request timeout".to_string());
        assert!(err.is_recoverable());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(HermesError::from(json_err).is_recoverable());
    }
}
