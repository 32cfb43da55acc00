//! Type definitions for parallel processing
//!
//! Contains data structures for batches, worker reports and configuration.

use std::time::Duration;

use crate::error_handling::ErrorSummary;
use crate::model::Delta;
use crate::transform::Record;

/// Configuration for parallel processing
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub sync_period: Duration,
    pub sync_jitter: Duration,
    pub num_processors: usize,
    pub batch_size: usize,
    pub flush_after: Duration,
    pub input_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub poll_interval: Duration,
    pub worker_stop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let num_processors = num_cpus::get();
        Self {
            sync_period: Duration::from_secs(60),
            sync_jitter: Duration::from_secs(5),
            num_processors,
            batch_size: 100,
            flush_after: Duration::from_secs(3),
            input_queue_capacity: 10,
            output_queue_capacity: 4 * num_processors,
            poll_interval: Duration::from_millis(100),
            worker_stop_timeout: Duration::from_secs(60),
        }
    }
}

/// A batch of lines to be processed together
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: u64,
    /// 1-based number of the first line in `lines`
    pub start_line_num: usize,
    pub lines: Vec<String>,
}

/// Records produced from exactly one input batch
#[derive(Debug, Clone)]
pub struct OutputBatch {
    pub batch_id: u64,
    pub generation: u64,
    pub worker_id: usize,
    pub records: Vec<Record>,
}

/// Per-batch accounting a worker hands to the tracker on acknowledgement
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub lines: usize,
    pub records: usize,
    pub errors: ErrorSummary,
}

/// What a worker tells the coordinator when its generation ends
#[derive(Debug)]
pub enum WorkerReport {
    Finished {
        worker_id: usize,
        delta: Delta,
        stats: WorkerStats,
    },
    Crashed {
        worker_id: usize,
        lost_lines: usize,
    },
}

impl WorkerReport {
    pub fn worker_id(&self) -> usize {
        match self {
            WorkerReport::Finished { worker_id, .. } | WorkerReport::Crashed { worker_id, .. } => {
                *worker_id
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: usize,
    pub lines: usize,
    pub records: usize,
    pub errors: usize,
}
