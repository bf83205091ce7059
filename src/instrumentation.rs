//! Prometheus metrics for deliveries and HTTP handlers
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op, which is what the unit tests of other modules see.

use crate::errors::{HermesError, Result};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const DELIVERIES_TOTAL: &str = "hermes_deliveries_total";
pub const DELIVERY_DURATION_SECONDS: &str = "hermes_delivery_duration_seconds";
pub const DELIVERY_BATCH_EVENTS: &str = "hermes_delivery_batch_events";
pub const EVENTS_ENQUEUED_TOTAL: &str = "hermes_events_enqueued_total";
pub const HANDLER_DURATION_SECONDS: &str = "hermes_handler_duration_seconds";

pub const HANDLER_PING: &str = "ping";
pub const HANDLER_POST: &str = "post";

/// How a delivery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Accepted,
    Rejected,
    Failed,
}

impl DeliveryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryResult::Accepted => "accepted",
            DeliveryResult::Rejected => "rejected",
            DeliveryResult::Failed => "failed",
        }
    }
}

/// Install the process-wide Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| HermesError::Config(format!("Failed to install metrics recorder: {}", e)))
}

/// Count one delivery attempt.
///
/// Round-trip time and batch size are only recorded when the collector answered.
pub fn record_delivery(result: DeliveryResult, event_count: usize, duration: Duration) {
    counter!(DELIVERIES_TOTAL, "outcome" => result.as_str()).increment(1);

    if result != DeliveryResult::Failed {
        histogram!(DELIVERY_DURATION_SECONDS, "outcome" => result.as_str())
            .record(duration.as_secs_f64());
        histogram!(DELIVERY_BATCH_EVENTS).record(event_count as f64);
    }
}

pub fn record_enqueued(count: usize) {
    counter!(EVENTS_ENQUEUED_TOTAL).increment(count as u64);
}

pub fn record_handler(handler: &'static str, duration: Duration) {
    histogram!(HANDLER_DURATION_SECONDS, "handler" => handler).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(record: impl FnOnce()) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, record);
        handle.render()
    }

    #[test]
    fn test_delivery_outcomes_are_labelled() {
        let text = render(|| {
            record_delivery(DeliveryResult::Accepted, 3, Duration::from_millis(20));
            record_delivery(DeliveryResult::Accepted, 1, Duration::from_millis(40));
            record_delivery(DeliveryResult::Rejected, 2, Duration::from_millis(10));
        });

        assert!(text.contains(r#"hermes_deliveries_total{outcome="accepted"} 2"#));
        assert!(text.contains(r#"hermes_deliveries_total{outcome="rejected"} 1"#));
        assert!(text.contains(r#"hermes_delivery_duration_seconds_count{outcome="accepted"} 2"#));
        assert!(text.contains("hermes_delivery_batch_events_count 3"));
    }

    #[test]
    fn test_failed_deliveries_have_no_duration() {
        let text = render(|| {
            record_delivery(DeliveryResult::Failed, 5, Duration::from_secs(2));
        });

        assert!(text.contains(r#"hermes_deliveries_total{outcome="failed"} 1"#));
        assert!(!text.contains("hermes_delivery_duration_seconds"));
        assert!(!text.contains("hermes_delivery_batch_events"));
    }

    #[test]
    fn test_handler_latency_and_enqueued_events() {
        let text = render(|| {
            record_handler(HANDLER_PING, Duration::from_millis(1));
            record_handler(HANDLER_POST, Duration::from_millis(3));
            record_enqueued(4);
        });

        assert!(text.contains(r#"hermes_handler_duration_seconds_count{handler="ping"} 1"#));
        assert!(text.contains(r#"hermes_handler_duration_seconds_count{handler="post"} 1"#));
        assert!(text.contains("hermes_events_enqueued_total 4"));
    }
}
