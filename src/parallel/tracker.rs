//! Thread-safe state tracking for parallel processing
//!
//! `PipelineTracker` is shared by every pipeline thread. It counts batches
//! in flight (so the coordinator can wait for the input to drain), and
//! collects statistics and per-line errors.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error_handling::{report_line_error, ErrorSummary, LineError};
use crate::stats::PipelineStats;

use super::types::BatchOutcome;

#[derive(Debug)]
struct TrackerInner {
    in_flight: Mutex<usize>,
    drained: Condvar,
    stats: Mutex<PipelineStats>,
    errors: Mutex<ErrorSummary>,
    start_time: Instant,
}

#[derive(Debug, Clone)]
pub struct PipelineTracker {
    inner: Arc<TrackerInner>,
}

impl Default for PipelineTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn recover<'a, T>(result: std::sync::LockResult<MutexGuard<'a, T>>, what: &str) -> MutexGuard<'a, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Worker thread panicked, recovering {}", what);
            poisoned.into_inner()
        }
    }
}

impl PipelineTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                stats: Mutex::new(PipelineStats::new()),
                errors: Mutex::new(ErrorSummary::new()),
                start_time: Instant::now(),
            }),
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, usize> {
        recover(self.inner.in_flight.lock(), "in-flight counter")
    }

    fn lock_stats(&self) -> MutexGuard<'_, PipelineStats> {
        recover(self.inner.stats.lock(), "pipeline stats")
    }

    fn lock_errors(&self) -> MutexGuard<'_, ErrorSummary> {
        recover(self.inner.errors.lock(), "error summary")
    }

    /// Called by the batcher before a batch is pushed onto the input queue
    pub fn batch_enqueued(&self) {
        *self.lock_in_flight() += 1;
    }

    /// Undo `batch_enqueued` for a batch that never reached the queue
    pub fn batch_not_sent(&self, lines: usize) {
        self.lock_stats().lines_lost += lines;
        self.release_one();
    }

    /// Acknowledge a processed batch and fold its accounting in
    pub fn batch_done(&self, outcome: BatchOutcome) {
        {
            let mut stats = self.lock_stats();
            stats.records_written += outcome.records;
            stats.lines_dropped += outcome.errors.total();
            stats.batches_written += 1;
        }
        self.lock_errors().merge(outcome.errors);
        self.release_one();
    }

    /// Acknowledge a batch whose records never reached the output
    pub fn batch_lost(&self, lines: usize) {
        self.lock_stats().lines_lost += lines;
        self.release_one();
    }

    fn release_one(&self) {
        let mut in_flight = self.lock_in_flight();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.inner.drained.notify_all();
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.lock_in_flight()
    }

    /// Block until every enqueued batch was acknowledged. Returns false when
    /// `timeout` elapsed first.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let guard = self.lock_in_flight();
        let (guard, _) = recover_wait(
            self.inner
                .drained
                .wait_timeout_while(guard, timeout, |in_flight| *in_flight > 0),
        );
        *guard == 0
    }

    pub fn add_lines_read(&self, count: usize) {
        self.lock_stats().lines_read += count;
    }

    /// Count a line the reader itself had to drop
    pub fn record_reader_error(&self, error: &LineError, line_num: usize) {
        report_line_error(&mut self.lock_errors(), error, line_num);
        self.lock_stats().lines_dropped += 1;
    }

    pub fn record_generation(&self, generation: u64) {
        self.lock_stats().generations = generation;
    }

    pub fn record_recycle(&self) {
        self.lock_stats().recycles += 1;
    }

    pub fn record_sync(&self, ok: bool) {
        let mut stats = self.lock_stats();
        if ok {
            stats.syncs += 1;
        } else {
            stats.sync_failures += 1;
        }
    }

    pub fn record_lost_delta(&self) {
        self.lock_stats().lost_deltas += 1;
    }

    pub fn record_templates(&self, count: usize) {
        self.lock_stats().templates = count;
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.lock_stats().clone();
        stats.processing_time = self.inner.start_time.elapsed();
        stats
    }

    pub fn errors(&self) -> ErrorSummary {
        self.lock_errors().clone()
    }
}

fn recover_wait<'a>(
    result: std::sync::LockResult<(MutexGuard<'a, usize>, std::sync::WaitTimeoutResult)>,
) -> (MutexGuard<'a, usize>, std::sync::WaitTimeoutResult) {
    match result {
        Ok(pair) => pair,
        Err(poisoned) => {
            warn!("Worker thread panicked, recovering in-flight counter");
            poisoned.into_inner()
        }
    }
}
