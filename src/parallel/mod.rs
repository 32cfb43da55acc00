//! Concurrent ingestion pipeline
//!
//! Lines flow reader -> input queue -> worker generation -> output queue ->
//! writer. The coordinator periodically replaces the worker generation and
//! folds the workers' template deltas into the canonical model.
//!
//! # Module Structure
//!
//! - `types`: Data structures for batches, reports and configuration
//! - `tracker`: In-flight accounting, statistics and error collection
//! - `batching`: Reader thread and the size/time flushing batcher
//! - `worker`: Worker thread and per-batch line processing
//! - `sink`: Output writer thread
//! - `coordinator`: Recycle, merge, sync and drain protocol
//! - `processor`: Main PipelineProcessor orchestration

mod batching;
mod coordinator;
mod processor;
mod sink;
mod tracker;
mod types;
mod worker;

pub use processor::{PipelineOutcome, PipelineProcessor};
pub use tracker::PipelineTracker;
pub use types::{Batch, OutputBatch, PipelineConfig, WorkerReport, WorkerStats};
pub use worker::process_batch;
