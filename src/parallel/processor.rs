//! Main pipeline processor
//!
//! Wires the reader, the worker generations and the writer together and
//! runs the coordinator on the calling thread.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use std::io::{BufRead, BufWriter, Write};
use std::thread::{self, JoinHandle};
use tracing::debug;

use crate::config::InputFormat;
use crate::error_handling::ErrorSummary;
use crate::model::TemplateModel;
use crate::platform::Ctrl;
use crate::stats::PipelineStats;
use crate::store::TemplateStore;
use crate::transform::TransformerFactory;

use super::batching::{reader_thread, LineBatcher};
use super::coordinator::{Coordinator, RunSignals};
use super::sink::writer_thread;
use super::tracker::PipelineTracker;
use super::types::PipelineConfig;

/// What a finished run leaves behind
#[derive(Debug)]
pub struct PipelineOutcome {
    pub model: TemplateModel,
    pub stats: PipelineStats,
    pub errors: ErrorSummary,
}

/// Main pipeline processor
pub struct PipelineProcessor<F: TransformerFactory, S: TemplateStore> {
    settings: PipelineConfig,
    input_format: InputFormat,
    message_field: String,
    factory: F,
    store: S,
    model: Option<TemplateModel>,
}

impl<F: TransformerFactory, S: TemplateStore> PipelineProcessor<F, S> {
    pub fn new(settings: PipelineConfig, factory: F, store: S) -> Self {
        Self {
            settings,
            input_format: InputFormat::Text,
            message_field: "message".to_string(),
            factory,
            store,
            model: None,
        }
    }

    pub fn with_input_format(mut self, input_format: InputFormat, message_field: &str) -> Self {
        self.input_format = input_format;
        self.message_field = message_field.to_string();
        self
    }

    /// Start from `model` instead of whatever the store holds
    pub fn with_model(mut self, model: TemplateModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Process `reader` to completion, writing NDJSON records to `output`
    pub fn run<R, W>(
        self,
        reader: R,
        output: W,
        ctrl_rx: Option<Receiver<Ctrl>>,
    ) -> Result<PipelineOutcome>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let Self {
            settings,
            input_format,
            message_field,
            factory,
            mut store,
            model,
        } = self;

        let model = match model {
            Some(model) => model,
            None => store
                .load()
                .context("Failed to load template state")?
                .unwrap_or_default(),
        };
        debug!(templates = model.len(), "starting from template model");

        let tracker = PipelineTracker::new();
        let (input_tx, input_rx) = bounded(settings.input_queue_capacity);
        let (output_tx, output_rx) = bounded(settings.output_queue_capacity);
        let (finished_tx, finished_rx) = bounded::<()>(0);
        let (writer_stop_tx, writer_stop_rx) = bounded::<()>(0);
        let (writer_done_tx, writer_done_rx) = bounded::<()>(0);

        let batcher = LineBatcher::new(
            input_tx,
            tracker.clone(),
            settings.batch_size,
            settings.flush_after,
        );
        let reader_tracker = tracker.clone();
        let reader_handle = thread::Builder::new()
            .name("drainflow-reader".to_string())
            .spawn(move || reader_thread(reader, batcher, reader_tracker, finished_tx))
            .context("Failed to spawn reader thread")?;

        let poll_interval = settings.poll_interval;
        let writer_handle = thread::Builder::new()
            .name("drainflow-writer".to_string())
            .spawn(move || {
                writer_thread(
                    BufWriter::new(output),
                    output_rx,
                    writer_stop_rx,
                    poll_interval,
                    writer_done_tx,
                )
            })
            .context("Failed to spawn writer thread")?;

        let mut coordinator = Coordinator::new(
            factory,
            store,
            model,
            settings,
            input_format,
            message_field,
            input_rx,
            output_tx,
            tracker.clone(),
        );
        let run_result = coordinator.run(RunSignals {
            input_finished: finished_rx,
            writer_done: writer_done_rx,
            writer_stop: writer_stop_tx,
            ctrl: ctrl_rx,
        });
        let (model, _store) = coordinator.into_parts();

        let writer_result = join(writer_handle, "writer");
        let reader_result = join(reader_handle, "reader");

        let writer_failed = run_result?;
        writer_result.context("Failed to write output")?;
        if writer_failed {
            return Err(anyhow!("Output writer stopped before the input was drained"));
        }
        reader_result.context("Failed to read input")?;

        Ok(PipelineOutcome {
            model,
            stats: tracker.stats(),
            errors: tracker.errors(),
        })
    }
}

fn join<T>(handle: JoinHandle<Result<T>>, name: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{} thread panicked", name))?
}
