//! Ingest queue, batcher task and its supervisor

use crate::accumulator::{BatchAccumulator, BatchLimits};
use crate::config::Config;
use crate::errors::{HermesError, Result};
use crate::queue::{IngestQueue, IngestReceiver, ingest_queue};
use crate::sink::BatchSink;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// How the supervisor reacts to a failed batcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_consecutive_failures: u32,
    pub pause: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_consecutive_failures: 10,
            pause: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backoff_base: Duration::from_millis(config.restart_backoff_ms),
            ..Self::default()
        }
    }

    /// Exponential backoff for the n-th consecutive failure (1-based), without jitter.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1_u32 << exponent)
            .min(self.backoff_max)
    }

    fn backoff_with_jitter(&self, failures: u32) -> Duration {
        let backoff = self.backoff(failures);
        let jitter_ms = (backoff.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Running batch pipeline: the producer handle plus the supervised consumer task.
pub struct BatchPipeline {
    queue: IngestQueue,
    task: JoinHandle<()>,
}

impl BatchPipeline {
    /// Create the queue and spawn the supervised batcher on the current runtime.
    pub fn spawn<S>(sink: S, limits: BatchLimits, capacity: usize, policy: RestartPolicy) -> Self
    where
        S: BatchSink + 'static,
    {
        let (queue, rx) = ingest_queue(capacity);
        let accumulator = BatchAccumulator::new(sink, limits);
        let task = tokio::spawn(supervise(accumulator, rx, policy));
        Self { queue, task }
    }

    pub fn from_config<S>(config: &Config, sink: S) -> Self
    where
        S: BatchSink + 'static,
    {
        Self::spawn(
            sink,
            BatchLimits::from(config),
            config.queue_capacity,
            RestartPolicy::from_config(config),
        )
    }

    /// Producer handle for request handlers
    pub fn queue(&self) -> IngestQueue {
        self.queue.clone()
    }

    /// Send the shutdown sentinel and wait for the batcher to drain.
    #[instrument(skip(self))]
    pub async fn shutdown(self) -> Result<()> {
        match self.queue.shutdown().await {
            Ok(()) => info!("Shutdown requested, waiting for batcher to drain"),
            // supervisor already gave up, nothing left to drain
            Err(HermesError::QueueClosed) => warn!("Batcher already stopped"),
            Err(e) => return Err(e),
        }

        if let Err(e) = self.task.await {
            error!("Batcher task ended abnormally: {}", e);
        }
        Ok(())
    }
}

/// Own the batcher for the lifetime of the process.
///
/// Recoverable errors resume the same accumulator after a backoff. A
/// configuration error stops it and closes the queue, so producers get an
/// error instead of blocking forever.
async fn supervise<S: BatchSink>(
    mut accumulator: BatchAccumulator<S>,
    mut rx: IngestReceiver,
    policy: RestartPolicy,
) {
    let limits = accumulator.limits();
    info!(
        max_count = limits.max_count,
        max_size = limits.max_size,
        max_delay_ms = limits.max_delay.as_millis() as u64,
        "Batcher starting"
    );

    let mut consecutive_failures = 0;
    let mut flushed_at_last_failure = 0;

    loop {
        match accumulator.run(&mut rx).await {
            Ok(()) => {
                info!(batches = accumulator.batches_flushed(), "Batcher stopped");
                break;
            }
            Err(e) if !e.is_recoverable() => {
                error!("Batcher halted, no further events will be delivered: {}", e);
                break;
            }
            Err(HermesError::Serialization(e)) => {
                warn!("Skipped unserializable event: {}", e);
            }
            Err(e) => {
                if accumulator.batches_flushed() > flushed_at_last_failure {
                    consecutive_failures = 0;
                }
                flushed_at_last_failure = accumulator.batches_flushed();
                consecutive_failures += 1;

                if consecutive_failures >= policy.max_consecutive_failures {
                    error!(
                        "Too many consecutive batcher failures ({}), pausing for {}s: {}",
                        consecutive_failures,
                        policy.pause.as_secs(),
                        e
                    );
                    sleep(policy.pause).await;
                    consecutive_failures = 0;
                    continue;
                }

                let backoff = policy.backoff_with_jitter(consecutive_failures);
                warn!(
                    "Batcher failed (attempt {}), resuming in {}ms: {}",
                    consecutive_failures,
                    backoff.as_millis(),
                    e
                );
                sleep(backoff).await;
            }
        }
    }

    rx.close();
}
