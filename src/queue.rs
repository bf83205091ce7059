//! Bounded hand-off between request handlers and the batcher

use crate::errors::{HermesError, Result};
use crate::event::Event;
use tokio::sync::mpsc;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Item travelling through the ingest queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Event(Event),
    /// Sentinel asking the consumer to drain and stop
    Shutdown,
}

/// Producer side of the ingest queue. Cheap to clone, one per request handler.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<QueueItem>,
}

/// Consumer side of the ingest queue, owned by the batcher.
#[derive(Debug)]
pub struct IngestReceiver {
    rx: mpsc::Receiver<QueueItem>,
}

/// Create a queue holding at most `capacity` items.
pub fn ingest_queue(capacity: usize) -> (IngestQueue, IngestReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngestQueue { tx }, IngestReceiver { rx })
}

impl IngestQueue {
    /// Enqueue an event, waiting while the queue is full.
    pub async fn enqueue(&self, event: Event) -> Result<()> {
        self.tx
            .send(QueueItem::Event(event))
            .await
            .map_err(|_| HermesError::QueueClosed)
    }

    /// Ask the consumer to stop after draining what it has buffered.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(QueueItem::Shutdown)
            .await
            .map_err(|_| HermesError::QueueClosed)
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl IngestReceiver {
    /// Next item in FIFO order. A closed queue reads as [`QueueItem::Shutdown`].
    pub async fn recv(&mut self) -> QueueItem {
        self.rx.recv().await.unwrap_or(QueueItem::Shutdown)
    }

    /// Stop accepting new items; producers get [`HermesError::QueueClosed`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}
