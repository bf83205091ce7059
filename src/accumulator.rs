//! Count, size and quiescence bounded batching of serialized events

use crate::config::Config;
use crate::errors::Result;
use crate::event::Event;
use crate::queue::{IngestReceiver, QueueItem};
use crate::sink::{BatchSink, DeliveryOutcome};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_BATCH_COUNT: usize = 100;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Thresholds that complete a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_count: usize,
    pub max_size: usize,
    pub max_delay: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_BATCH_COUNT,
            max_size: DEFAULT_MAX_BATCH_SIZE,
            max_delay: DEFAULT_MAX_BATCH_DELAY,
        }
    }
}

impl From<&Config> for BatchLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_count: config.max_batch_count,
            max_size: config.max_batch_size,
            max_delay: config.max_batch_delay.max(Duration::from_millis(1)),
        }
    }
}

/// Lines waiting to be flushed.
///
/// Only the accumulator loop touches this, so it carries no locking.
#[derive(Debug, Default)]
pub struct PendingBatch {
    lines: String,
    event_count: usize,
    byte_size: usize,
}

impl PendingBatch {
    /// Append one serialized event, newline separated from the previous one.
    pub fn push_line(&mut self, line: &str) {
        if self.event_count > 0 {
            self.lines.push('\n');
        }
        self.lines.push_str(line);
        self.event_count += 1;
        self.byte_size = self.lines.len();
    }

    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn lines(&self) -> &str {
        &self.lines
    }

    /// Snapshot into a [`CompletedBatch`] and reset all counters together.
    pub fn take(&mut self) -> CompletedBatch {
        let payload = std::mem::take(&mut self.lines);
        let event_count = std::mem::take(&mut self.event_count);
        self.byte_size = 0;
        CompletedBatch::new(payload, event_count)
    }
}

/// Immutable batch handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBatch {
    pub batch_id: String,
    pub payload: String,
    pub event_count: usize,
}

impl CompletedBatch {
    pub fn new(payload: String, event_count: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            payload,
            event_count,
        }
    }

    /// Iterate over the serialized events in arrival order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.payload.split('\n').filter(|line| !line.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    Accumulating,
    Flushing,
    Stopped,
}

/// What the loop should do after one [`BatchAccumulator::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stopped,
}

/// Single consumer of the ingest queue.
///
/// Each iteration races the next queue item against a timer of
/// `max_delay`. The timer is armed anew on every iteration, so it measures
/// time since the last event and a steady trickle of events keeps a small
/// batch open until the count or size limit is hit.
pub struct BatchAccumulator<S> {
    sink: S,
    limits: BatchLimits,
    pending: PendingBatch,
    state: AccumulatorState,
    batches_flushed: u64,
}

impl<S: BatchSink> BatchAccumulator<S> {
    pub fn new(sink: S, limits: BatchLimits) -> Self {
        Self {
            sink,
            limits,
            pending: PendingBatch::default(),
            state: AccumulatorState::Idle,
            batches_flushed: 0,
        }
    }

    /// Run until the shutdown sentinel has been processed.
    ///
    /// On error the accumulator keeps its pending batch and can be run again.
    pub async fn run(&mut self, rx: &mut IngestReceiver) -> Result<()> {
        loop {
            if self.step(rx).await? == Step::Stopped {
                return Ok(());
            }
        }
    }

    /// One loop iteration.
    pub async fn step(&mut self, rx: &mut IngestReceiver) -> Result<Step> {
        if self.state == AccumulatorState::Stopped {
            return Ok(Step::Stopped);
        }

        tokio::select! {
            biased;

            item = rx.recv() => match item {
                QueueItem::Event(event) => {
                    self.accept(event).await?;
                    Ok(Step::Continue)
                }
                QueueItem::Shutdown => {
                    let drained = if self.pending.is_empty() {
                        Ok(())
                    } else {
                        info!(count = self.pending.event_count(), "Draining pending batch before shutdown");
                        self.flush().await
                    };
                    // the sentinel is consumed either way, a resumed run must not wait for another
                    self.state = AccumulatorState::Stopped;
                    drained?;
                    Ok(Step::Stopped)
                }
            },
            _ = sleep(self.limits.max_delay) => {
                if !self.pending.is_empty() {
                    debug!(count = self.pending.event_count(), "Quiescence timer expired");
                    self.flush().await?;
                }
                Ok(Step::Continue)
            }
        }
    }

    async fn accept(&mut self, event: Event) -> Result<()> {
        let line = event.to_line().map_err(|e| {
            warn!(host = %event.host, source = %event.source, "Dropping event that failed to serialize: {}", e);
            e
        })?;

        self.pending.push_line(&line);
        self.state = AccumulatorState::Accumulating;

        if self.pending.byte_size() >= self.limits.max_size {
            debug!(size = self.pending.byte_size(), "Size threshold reached");
            self.flush().await?;
        } else if self.pending.event_count() >= self.limits.max_count {
            debug!(count = self.pending.event_count(), "Count threshold reached");
            self.flush().await?;
        }

        Ok(())
    }

    /// Hand the pending batch to the sink and wait for it.
    async fn flush(&mut self) -> Result<()> {
        let batch = self.pending.take();
        self.state = AccumulatorState::Flushing;

        let result = self.sink.deliver(batch).await;
        self.state = AccumulatorState::Idle;

        match result? {
            DeliveryOutcome::Accepted { .. } => {}
            DeliveryOutcome::Rejected { status, .. } => {
                debug!(%status, "Batch rejected by collector, not retrying");
            }
        }
        self.batches_flushed += 1;
        Ok(())
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn pending(&self) -> &PendingBatch {
        &self.pending
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Batches that reached the collector, accepted or rejected.
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }
}
