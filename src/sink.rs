//! Outbound delivery of completed batches to the Splunk HTTP Event Collector

use crate::accumulator::CompletedBatch;
use crate::errors::{HermesError, Result};
use crate::instrumentation::{self, DeliveryResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const EVENT_PATH: &str = "/services/collector/event";
const HEALTH_PATH: &str = "/services/collector/health/1.0";

/// Result of one delivery attempt that reached the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Accepted { status: StatusCode },
    Rejected { status: StatusCode, body: String },
}

impl DeliveryOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            DeliveryOutcome::Accepted { status } | DeliveryOutcome::Rejected { status, .. } => *status,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryOutcome::Accepted { .. })
    }
}

/// Destination for completed batches.
///
/// `Err` means the batch never reached the collector. A collector that answers
/// with a non-success status is still `Ok(DeliveryOutcome::Rejected { .. })`.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, batch: CompletedBatch) -> Result<DeliveryOutcome>;
}

#[async_trait]
impl<T: BatchSink + ?Sized> BatchSink for Arc<T> {
    async fn deliver(&self, batch: CompletedBatch) -> Result<DeliveryOutcome> {
        (**self).deliver(batch).await
    }
}

/// HEC client
#[derive(Debug)]
pub struct HecSink {
    client: Client,
    endpoint: Option<String>,
    token: Option<String>,
    metrics: DeliveryMetrics,
}

impl HecSink {
    /// Create a new HEC sink.
    ///
    /// Endpoint and token may be missing; that is reported on first delivery.
    pub fn new(endpoint: Option<String>, token: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(format!("hermes/{}", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(HermesError::Http)?;

        Ok(Self {
            client,
            endpoint,
            token,
            metrics: DeliveryMetrics::new(),
        })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| HermesError::Config("SPLUNK_ENDPOINT is not set".to_string()))?;
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| HermesError::Config("SPLUNK_TOKEN is not set".to_string()))?;
        Ok((endpoint, token))
    }

    async fn send(&self, batch: &CompletedBatch) -> Result<DeliveryOutcome> {
        let (endpoint, token) = self.credentials()?;
        let url = build_url(endpoint, EVENT_PATH);

        debug!(
            batch_id = %batch.batch_id,
            count = batch.event_count,
            size = batch.payload.len(),
            "Sending batch to {}",
            url
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Splunk {}", token))
            .header("Content-Type", "application/json")
            .body(batch.payload.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HermesError::Transport(format!("Request to {} timed out", url))
                } else if e.is_builder() {
                    HermesError::Transport(format!("Could not build request for {}: {}", url, e))
                } else {
                    HermesError::Http(e)
                }
            })?;

        Ok(self.handle_response(response, batch).await)
    }

    /// Turn the collector's answer into an outcome. Never fails: a body that
    /// cannot be read only loses diagnostics.
    async fn handle_response(&self, response: Response, batch: &CompletedBatch) -> DeliveryOutcome {
        let status = response.status();

        if status.is_success() {
            return DeliveryOutcome::Accepted { status };
        }

        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            400 => warn!(batch_id = %batch.batch_id, %status, %body, "Collector rejected batch as malformed"),
            401 | 403 => warn!(batch_id = %batch.batch_id, %status, %body, "Collector rejected the HEC token"),
            413 => warn!(batch_id = %batch.batch_id, %status, %body, size = batch.payload.len(), "Batch too large for collector"),
            503 => warn!(batch_id = %batch.batch_id, %status, %body, "Collector queues are full"),
            _ => warn!(batch_id = %batch.batch_id, %status, %body, "Collector returned an error"),
        }

        DeliveryOutcome::Rejected { status, body }
    }

    /// Query the HEC health endpoint
    pub async fn health_check(&self) -> Result<StatusCode> {
        let (endpoint, token) = self.credentials()?;
        let url = build_url(endpoint, HEALTH_PATH);

        debug!("Performing health check against {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Splunk {}", token))
            .send()
            .await
            .map_err(HermesError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HermesError::Transport(format!(
                "Health check failed with status: {}",
                status
            )));
        }

        Ok(status)
    }

    /// Test connectivity to the collector
    pub async fn test_connectivity(&self) -> bool {
        match self.health_check().await {
            Ok(status) => {
                info!("Collector connectivity test successful: {}", status);
                true
            }
            Err(e) => {
                warn!("Collector connectivity test failed: {}", e);
                false
            }
        }
    }

    /// Get delivery metrics
    pub async fn metrics(&self) -> DeliveryMetricsSnapshot {
        self.metrics.snapshot().await
    }
}

#[async_trait]
impl BatchSink for HecSink {
    async fn deliver(&self, batch: CompletedBatch) -> Result<DeliveryOutcome> {
        let start_time = Instant::now();
        self.metrics.increment_attempts().await;

        match self.send(&batch).await {
            Ok(outcome) => {
                let elapsed = start_time.elapsed();
                if outcome.is_accepted() {
                    self.metrics.record_accepted(elapsed).await;
                    instrumentation::record_delivery(DeliveryResult::Accepted, batch.event_count, elapsed);
                } else {
                    self.metrics.record_rejected(elapsed).await;
                    instrumentation::record_delivery(DeliveryResult::Rejected, batch.event_count, elapsed);
                }
                info!(
                    batch_id = %batch.batch_id,
                    response = %outcome.status(),
                    size = batch.payload.len(),
                    count = batch.event_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upload completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                let elapsed = start_time.elapsed();
                self.metrics.record_failed().await;
                instrumentation::record_delivery(DeliveryResult::Failed, batch.event_count, elapsed);
                error!(batch_id = %batch.batch_id, count = batch.event_count, "Upload failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Join a base URL and a path, ignoring a trailing slash on the base.
pub fn build_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

/// Delivery metrics tracking.
///
/// Durations cover round trips that got an answer; failed attempts only count.
#[derive(Debug)]
struct DeliveryMetrics {
    attempts: RwLock<u64>,
    accepted: RwLock<u64>,
    rejected: RwLock<u64>,
    failed: RwLock<u64>,
    total_duration: RwLock<Duration>,
    min_duration: RwLock<Option<Duration>>,
    max_duration: RwLock<Option<Duration>>,
}

impl DeliveryMetrics {
    fn new() -> Self {
        Self {
            attempts: RwLock::new(0),
            accepted: RwLock::new(0),
            rejected: RwLock::new(0),
            failed: RwLock::new(0),
            total_duration: RwLock::new(Duration::ZERO),
            min_duration: RwLock::new(None),
            max_duration: RwLock::new(None),
        }
    }

    async fn increment_attempts(&self) {
        *self.attempts.write().await += 1;
    }

    async fn record_accepted(&self, duration: Duration) {
        *self.accepted.write().await += 1;
        self.update_duration_stats(duration).await;
    }

    async fn record_rejected(&self, duration: Duration) {
        *self.rejected.write().await += 1;
        self.update_duration_stats(duration).await;
    }

    async fn record_failed(&self) {
        *self.failed.write().await += 1;
    }

    async fn update_duration_stats(&self, duration: Duration) {
        *self.total_duration.write().await += duration;

        let mut min = self.min_duration.write().await;
        *min = Some(min.map_or(duration, |m| m.min(duration)));
        drop(min);

        let mut max = self.max_duration.write().await;
        *max = Some(max.map_or(duration, |m| m.max(duration)));
    }

    async fn snapshot(&self) -> DeliveryMetricsSnapshot {
        let attempts = *self.attempts.read().await;
        let accepted = *self.accepted.read().await;
        let rejected = *self.rejected.read().await;
        let failed = *self.failed.read().await;
        let total_duration = *self.total_duration.read().await;
        let min_duration = *self.min_duration.read().await;
        let max_duration = *self.max_duration.read().await;

        let success_rate = if attempts > 0 {
            (accepted as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        let answered = accepted + rejected;
        let avg_duration = if answered > 0 {
            Duration::from_nanos((total_duration.as_nanos() / answered as u128) as u64)
        } else {
            Duration::ZERO
        };

        DeliveryMetricsSnapshot {
            attempts,
            accepted,
            rejected,
            failed,
            success_rate,
            avg_duration_ms: avg_duration.as_millis() as u64,
            min_duration_ms: min_duration.map(|d| d.as_millis() as u64),
            max_duration_ms: max_duration.map(|d| d.as_millis() as u64),
        }
    }
}

/// Snapshot of delivery metrics
#[derive(Debug, Clone)]
pub struct DeliveryMetricsSnapshot {
    pub attempts: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_duration_ms: u64,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
}
