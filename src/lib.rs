//! hermes: HTTP event forwarder for the Splunk HTTP Event Collector
//!
//! Events posted to the API are normalized, queued, grouped into
//! count/size/quiescence bounded batches and delivered to HEC.

pub mod accumulator;
pub mod api;
pub mod config;
pub mod errors;
pub mod event;
pub mod instrumentation;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod sink;

pub use accumulator::{BatchAccumulator, BatchLimits, CompletedBatch};
pub use config::Config;
pub use errors::{HermesError, Result};
pub use event::{Event, RequestDefaults};
pub use pipeline::{BatchPipeline, RestartPolicy};
pub use queue::{IngestQueue, ingest_queue};
pub use sink::{BatchSink, DeliveryOutcome, HecSink};
