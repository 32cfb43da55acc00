//! Worker thread for parallel processing
//!
//! Each worker owns one transformer built from its generation's snapshot. It
//! pops batches until its generation is stopped, then consumes the
//! transformer into a delta and reports it to the coordinator.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::InputFormat;
use crate::error_handling::{report_line_error, ErrorSummary};
use crate::transform::{process_line, Record, RecordTransformer};

use super::tracker::PipelineTracker;
use super::types::{Batch, BatchOutcome, OutputBatch, WorkerReport, WorkerStats};

/// Everything a worker needs besides its transformer
pub(crate) struct WorkerSetup {
    pub worker_id: usize,
    pub generation: u64,
    pub input_rx: Receiver<Batch>,
    pub output_tx: Sender<OutputBatch>,
    /// Never carries a message; disconnection means "stop"
    pub stop_rx: Receiver<()>,
    pub report_tx: Sender<WorkerReport>,
    pub tracker: PipelineTracker,
    pub input_format: InputFormat,
    pub message_field: String,
    pub poll_interval: Duration,
}

/// Reports a crash if the worker unwinds before disarming it
struct CrashGuard {
    worker_id: usize,
    generation: u64,
    report_tx: Sender<WorkerReport>,
    tracker: PipelineTracker,
    in_flight: Option<usize>,
    armed: bool,
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let lost_lines = self.in_flight.take().unwrap_or(0);
        if lost_lines > 0 {
            self.tracker.batch_lost(lost_lines);
        }
        error!(
            worker_id = self.worker_id,
            generation = self.generation,
            lost_lines,
            "worker crashed, its template delta is lost"
        );
        let _ = self.report_tx.send(WorkerReport::Crashed {
            worker_id: self.worker_id,
            lost_lines,
        });
    }
}

/// Worker thread: processes batches until the generation is stopped
pub(crate) fn worker_thread<T: RecordTransformer>(mut transformer: T, setup: WorkerSetup) {
    let mut guard = CrashGuard {
        worker_id: setup.worker_id,
        generation: setup.generation,
        report_tx: setup.report_tx.clone(),
        tracker: setup.tracker.clone(),
        in_flight: None,
        armed: true,
    };
    let mut stats = WorkerStats::default();

    loop {
        if let Err(TryRecvError::Disconnected) = setup.stop_rx.try_recv() {
            break;
        }

        let batch = match setup.input_rx.recv_timeout(setup.poll_interval) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let lines = batch.lines.len();
        guard.in_flight = Some(lines);

        let (records, errors) = process_batch(
            &mut transformer,
            &batch,
            &setup.input_format,
            &setup.message_field,
        );
        let outcome = BatchOutcome {
            lines,
            records: records.len(),
            errors,
        };

        stats.batches += 1;
        stats.lines += lines;
        stats.records += outcome.records;
        stats.errors += outcome.errors.total();

        let output = OutputBatch {
            batch_id: batch.id,
            generation: setup.generation,
            worker_id: setup.worker_id,
            records,
        };
        if setup.output_tx.send(output).is_err() {
            warn!(
                worker_id = setup.worker_id,
                batch_id = batch.id,
                lines,
                "output queue closed, dropping batch"
            );
            setup.tracker.batch_lost(lines);
            guard.in_flight = None;
            break;
        }

        setup.tracker.batch_done(outcome);
        guard.in_flight = None;
    }

    let delta = transformer.delta();
    guard.armed = false;

    debug!(
        worker_id = setup.worker_id,
        generation = setup.generation,
        batches = stats.batches,
        modified = delta.modified.len(),
        new = delta.new.len(),
        "worker stopped"
    );
    let _ = setup.report_tx.send(WorkerReport::Finished {
        worker_id: setup.worker_id,
        delta,
        stats,
    });
}

/// Turn every line of `batch` into a record, logging and counting failures
pub fn process_batch<T: RecordTransformer>(
    transformer: &mut T,
    batch: &Batch,
    input_format: &InputFormat,
    message_field: &str,
) -> (Vec<Record>, ErrorSummary) {
    let mut records = Vec::with_capacity(batch.lines.len());
    let mut errors = ErrorSummary::new();

    for (offset, line) in batch.lines.iter().enumerate() {
        let line_num = batch.start_line_num + offset;
        match process_line(transformer, line, input_format, message_field) {
            Ok(record) => records.push(record),
            Err(err) => report_line_error(&mut errors, &err, line_num),
        }
    }

    (records, errors)
}
