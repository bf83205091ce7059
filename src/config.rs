//! Configuration management for the event forwarder

use crate::accumulator::{DEFAULT_MAX_BATCH_COUNT, DEFAULT_MAX_BATCH_DELAY, DEFAULT_MAX_BATCH_SIZE};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Splunk HTTP Event Collector, e.g. `https://splunk:8088`
    pub splunk_endpoint: Option<String>,

    /// HEC token sent as `Authorization: Splunk <token>`
    pub splunk_token: Option<String>,

    /// Flush once this many events are pending
    pub max_batch_count: usize,

    /// Flush once the pending body reaches this many bytes
    pub max_batch_size: usize,

    /// Flush after this long without a new event
    pub max_batch_delay: Duration,

    /// Capacity of the queue between request handlers and the batcher
    pub queue_capacity: usize,

    /// Port the HTTP API listens on
    pub api_port: u16,

    /// Port serving Prometheus metrics on `/metrics`
    pub metrics_port: u16,

    /// Per-request timeout for HEC calls, none by default
    pub http_timeout: Option<Duration>,

    /// Base delay before the supervisor resumes a failed batcher
    pub restart_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            splunk_endpoint: None,
            splunk_token: None,
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay: DEFAULT_MAX_BATCH_DELAY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            api_port: 8080,
            metrics_port: 9090,
            http_timeout: None,
            restart_backoff_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers keep their default. Empty strings count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = get("SPLUNK_ENDPOINT") {
            config.splunk_endpoint = Some(endpoint.trim().to_string());
        }

        if let Some(token) = get("SPLUNK_TOKEN") {
            config.splunk_token = Some(token.trim().to_string());
        }

        if let Some(count) = get("MAX_BATCH_COUNT") {
            if let Ok(count) = count.trim().parse() {
                config.max_batch_count = count;
            }
        }

        if let Some(size) = get("MAX_BATCH_SIZE") {
            if let Ok(size) = size.trim().parse() {
                config.max_batch_size = size;
            }
        }

        if let Some(delay) = get("MAX_BATCH_DELAY_MS") {
            if let Ok(ms) = delay.trim().parse::<i64>() {
                // a zero or negative delay would spin the batcher
                config.max_batch_delay = Duration::from_millis(ms.max(1) as u64);
            }
        }

        if let Some(capacity) = get("INGEST_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.trim().parse() {
                config.queue_capacity = capacity;
            }
        }

        if let Some(port) = get("API_PORT") {
            if let Ok(port) = port.trim().parse() {
                config.api_port = port;
            }
        }

        if let Some(port) = get("METRICS_PORT") {
            if let Ok(port) = port.trim().parse() {
                config.metrics_port = port;
            }
        }

        if let Some(timeout) = get("SPLUNK_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.trim().parse::<u64>() {
                if seconds > 0 {
                    config.http_timeout = Some(Duration::from_secs(seconds));
                }
            }
        }

        if let Some(backoff) = get("RESTART_BACKOFF_MS") {
            if let Ok(ms) = backoff.trim().parse() {
                config.restart_backoff_ms = ms;
            }
        }

        config
    }

    /// Validate the configuration.
    ///
    /// Endpoint and token are not checked here; their absence surfaces on the
    /// first delivery attempt.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_count == 0 {
            return Err("max_batch_count must be greater than 0".to_string());
        }

        if self.max_batch_size == 0 {
            return Err("max_batch_size must be greater than 0".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }

        if self.api_port == 0 {
            return Err("api_port must be greater than 0".to_string());
        }

        if self.metrics_port == 0 {
            return Err("metrics_port must be greater than 0".to_string());
        }

        if self.metrics_port == self.api_port {
            return Err(format!(
                "metrics_port and api_port must differ, both are {}",
                self.api_port
            ));
        }

        Ok(())
    }
}
