//! Generation lifecycle: spawn, recycle, merge, sync, drain
//!
//! The coordinator owns the canonical model. Workers only ever see an
//! `Arc` snapshot of it; their deltas come back through a per-generation
//! report channel and are merged once every worker of the generation has
//! reported or been given up on.

use anyhow::{Context, Result};
use crossbeam_channel::{
    after, never, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::InputFormat;
use crate::model::{Delta, MergeSummary, TemplateModel};
use crate::platform::Ctrl;
use crate::store::TemplateStore;
use crate::transform::TransformerFactory;

use super::tracker::PipelineTracker;
use super::types::{Batch, OutputBatch, PipelineConfig, WorkerReport};
use super::worker::{worker_thread, WorkerSetup};

/// One pool of workers sharing a snapshot
pub(crate) struct Generation {
    number: u64,
    size: usize,
    stop_tx: Sender<()>,
    report_rx: Receiver<WorkerReport>,
    handles: Vec<JoinHandle<()>>,
    early_reports: Vec<WorkerReport>,
}

impl Generation {
    fn all_exited(&self) -> bool {
        self.handles.iter().all(|handle| handle.is_finished())
    }
}

/// Why the running coordinator woke up
enum Wake {
    InputFinished,
    WriterDone,
    Ctrl(Ctrl),
    CtrlClosed,
    WorkerExited(WorkerReport),
    RecycleDue,
}

/// Channels the coordinator waits on while the pipeline runs
pub(crate) struct RunSignals {
    /// Disconnected by the reader once every batch is enqueued
    pub input_finished: Receiver<()>,
    /// Disconnected when the writer thread exits
    pub writer_done: Receiver<()>,
    /// Dropping this tells the writer to stop once the queue is empty
    pub writer_stop: Sender<()>,
    pub ctrl: Option<Receiver<Ctrl>>,
}

pub(crate) struct Coordinator<F: TransformerFactory, S: TemplateStore> {
    factory: F,
    store: S,
    model: TemplateModel,
    generation: u64,
    settings: PipelineConfig,
    input_format: InputFormat,
    message_field: String,
    input_rx: Option<Receiver<Batch>>,
    output_tx: Option<Sender<OutputBatch>>,
    tracker: PipelineTracker,
}

impl<F: TransformerFactory, S: TemplateStore> Coordinator<F, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        factory: F,
        store: S,
        model: TemplateModel,
        settings: PipelineConfig,
        input_format: InputFormat,
        message_field: String,
        input_rx: Receiver<Batch>,
        output_tx: Sender<OutputBatch>,
        tracker: PipelineTracker,
    ) -> Self {
        tracker.record_templates(model.len());
        Self {
            factory,
            store,
            model,
            generation: 1,
            settings,
            input_format,
            message_field,
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            tracker,
        }
    }

    #[cfg(test)]
    pub(crate) fn model(&self) -> &TemplateModel {
        &self.model
    }

    pub(crate) fn into_parts(self) -> (TemplateModel, S) {
        (self.model, self.store)
    }

    /// Start `num_processors` workers on a snapshot of the canonical model
    pub(crate) fn spawn_generation(&mut self) -> Result<Generation> {
        let input_rx = self
            .input_rx
            .clone()
            .context("Input queue already closed")?;
        let output_tx = self
            .output_tx
            .clone()
            .context("Output queue already closed")?;

        let snapshot = self.model.snapshot(self.generation);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let (report_tx, report_rx) = unbounded();
        let size = self.settings.num_processors;
        let mut handles = Vec::with_capacity(size);

        for worker_id in 0..size {
            let transformer = self.factory.create(Arc::clone(&snapshot));
            let setup = WorkerSetup {
                worker_id,
                generation: self.generation,
                input_rx: input_rx.clone(),
                output_tx: output_tx.clone(),
                stop_rx: stop_rx.clone(),
                report_tx: report_tx.clone(),
                tracker: self.tracker.clone(),
                input_format: self.input_format.clone(),
                message_field: self.message_field.clone(),
                poll_interval: self.settings.poll_interval,
            };
            let handle = thread::Builder::new()
                .name(format!("drainflow-g{}-w{}", self.generation, worker_id))
                .spawn(move || worker_thread(transformer, setup))
                .context("Failed to spawn worker thread")?;
            handles.push(handle);
        }

        self.tracker.record_generation(self.generation);
        info!(
            generation = self.generation,
            workers = size,
            templates = self.model.len(),
            "generation started"
        );

        Ok(Generation {
            number: self.generation,
            size,
            stop_tx,
            report_rx,
            handles,
            early_reports: Vec::new(),
        })
    }

    /// Stop every worker of `generation` and collect their deltas.
    ///
    /// Returns once all workers reported or `worker_stop_timeout` elapsed.
    /// Deltas of crashed or unresponsive workers are lost.
    pub(crate) fn stop_generation(&mut self, generation: Generation) -> Vec<Delta> {
        let Generation {
            number,
            size,
            stop_tx,
            report_rx,
            handles,
            early_reports,
        } = generation;
        drop(stop_tx);

        let mut reports: BTreeMap<usize, WorkerReport> = early_reports
            .into_iter()
            .map(|report| (report.worker_id(), report))
            .collect();
        let deadline = Instant::now() + self.settings.worker_stop_timeout;

        while reports.len() < size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match report_rx.recv_timeout(remaining) {
                Ok(report) => {
                    reports.insert(report.worker_id(), report);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let missing = size - reports.len();
        if missing > 0 {
            warn!(
                generation = number,
                missing,
                "workers did not stop in time, abandoning them and losing their deltas"
            );
            for _ in 0..missing {
                self.tracker.record_lost_delta();
            }
        }

        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        let mut deltas = Vec::with_capacity(reports.len());
        for (worker_id, report) in reports {
            match report {
                WorkerReport::Finished { delta, stats, .. } => {
                    debug!(
                        generation = number,
                        worker_id,
                        batches = stats.batches,
                        lines = stats.lines,
                        "worker delta collected"
                    );
                    deltas.push(delta);
                }
                WorkerReport::Crashed { lost_lines, .. } => {
                    warn!(
                        generation = number,
                        worker_id, lost_lines, "worker crashed, its delta is lost"
                    );
                    self.tracker.record_lost_delta();
                }
            }
        }
        deltas
    }

    /// Fold deltas into the canonical model and persist it
    pub(crate) fn merge_and_sync(&mut self, deltas: Vec<Delta>) {
        let mut summary = MergeSummary::default();
        for delta in deltas {
            summary.absorb(self.model.merge(delta));
        }
        self.tracker.record_templates(self.model.len());
        info!(
            generation = self.generation,
            added = summary.added,
            combined = summary.combined,
            templates = self.model.len(),
            "deltas merged"
        );

        match self.store.sync(&self.model, self.generation) {
            Ok(()) => {
                self.tracker.record_sync(true);
                debug!(generation = self.generation, "template model synced");
            }
            Err(err) => {
                self.tracker.record_sync(false);
                warn!(
                    generation = self.generation,
                    error = %err,
                    "sync failed, keeping model in memory until the next recycle"
                );
            }
        }
    }

    /// Stop, merge, sync, and start the next generation
    pub(crate) fn recycle(&mut self, generation: Generation) -> Result<Generation> {
        let deltas = self.stop_generation(generation);
        self.merge_and_sync(deltas);
        self.generation += 1;
        self.tracker.record_recycle();
        self.spawn_generation()
    }

    /// Recycle interval with uniform jitter in both directions
    pub(crate) fn next_sleep(&self) -> Duration {
        let period = self.settings.sync_period.as_secs_f64();
        let jitter = self.settings.sync_jitter.as_secs_f64();
        let offset = (fastrand::f64() * 2.0 - 1.0) * jitter;
        Duration::from_secs_f64((period + offset).max(0.0))
    }

    /// Drive the pipeline until the input is exhausted and drained.
    ///
    /// Returns true when the writer went away before the input was drained.
    pub(crate) fn run(&mut self, signals: RunSignals) -> Result<bool> {
        let RunSignals {
            input_finished,
            writer_done,
            writer_stop,
            ctrl,
        } = signals;
        let mut ctrl_rx = ctrl.unwrap_or_else(never);

        let mut generation = self.spawn_generation()?;
        let mut deadline = Instant::now() + self.next_sleep();

        let writer_failed = loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            let wake = select! {
                recv(input_finished) -> _ => Wake::InputFinished,
                recv(writer_done) -> _ => Wake::WriterDone,
                recv(ctrl_rx) -> msg => match msg {
                    Ok(ctrl) => Wake::Ctrl(ctrl),
                    Err(_) => Wake::CtrlClosed,
                },
                recv(generation.report_rx) -> msg => match msg {
                    Ok(report) => Wake::WorkerExited(report),
                    Err(_) => Wake::RecycleDue,
                },
                recv(after(wait)) -> _ => Wake::RecycleDue,
            };

            match wake {
                Wake::InputFinished => break false,
                Wake::WriterDone => break true,
                Wake::Ctrl(Ctrl::PrintStats) => {
                    info!("{}", self.tracker.stats().format_stats());
                }
                Wake::Ctrl(Ctrl::Shutdown(_)) => {
                    info!("shutdown requested, waiting for the reader to stop");
                }
                Wake::CtrlClosed => ctrl_rx = never(),
                Wake::WorkerExited(report) => {
                    if writer_gone(&writer_done) {
                        generation.early_reports.push(report);
                        break true;
                    }
                    // Workers leave on their own once the input queue closes
                    let finished = matches!(report, WorkerReport::Finished { .. });
                    if finished && input_done(&input_finished) {
                        generation.early_reports.push(report);
                        break false;
                    }
                    warn!(
                        generation = generation.number,
                        worker_id = report.worker_id(),
                        "worker exited early, recycling now"
                    );
                    generation.early_reports.push(report);
                    generation = self.recycle(generation)?;
                    deadline = Instant::now() + self.next_sleep();
                }
                Wake::RecycleDue => {
                    generation = self.recycle(generation)?;
                    deadline = Instant::now() + self.next_sleep();
                }
            }
        };

        self.drain(generation, writer_failed, &writer_done, writer_stop)
    }

    fn drain(
        &mut self,
        mut generation: Generation,
        mut writer_failed: bool,
        writer_done: &Receiver<()>,
        writer_stop: Sender<()>,
    ) -> Result<bool> {
        if !writer_failed {
            info!(in_flight = self.tracker.in_flight(), "input finished, draining");
            while !self.tracker.wait_drained(self.settings.poll_interval) {
                if writer_gone(writer_done) {
                    writer_failed = true;
                    break;
                }
                if generation.all_exited() {
                    warn!(
                        generation = generation.number,
                        in_flight = self.tracker.in_flight(),
                        "every worker exited with batches in flight, respawning"
                    );
                    generation = self.recycle(generation)?;
                }
            }
        }

        let deltas = self.stop_generation(generation);
        self.merge_and_sync(deltas);

        if writer_failed {
            error!("output writer stopped early, remaining input was not processed");
        } else if let Some(output_tx) = &self.output_tx {
            while !output_tx.is_empty() && !writer_gone(writer_done) {
                thread::sleep(self.settings.poll_interval);
            }
        }

        // Unblocks a reader still waiting on a full input queue
        self.input_rx = None;
        self.output_tx = None;
        drop(writer_stop);
        Ok(writer_failed)
    }
}

fn writer_gone(writer_done: &Receiver<()>) -> bool {
    matches!(writer_done.try_recv(), Err(TryRecvError::Disconnected))
}

fn input_done(input_finished: &Receiver<()>) -> bool {
    matches!(input_finished.try_recv(), Err(TryRecvError::Disconnected))
}
