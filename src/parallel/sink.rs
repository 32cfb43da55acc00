//! Output writer thread for parallel processing
//!
//! Single consumer of the output queue. Writes one JSON document per line
//! and flushes after every batch.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::io::Write;
use std::time::Duration;
use tracing::debug;

use super::types::OutputBatch;

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected))
}

/// Writer thread: drains the output queue into `output`.
///
/// Exits once `stop_rx` is disconnected and the queue is empty, or when every
/// producer is gone. `done_tx` is dropped on return either way.
pub(crate) fn writer_thread<W: Write>(
    mut output: W,
    output_rx: Receiver<OutputBatch>,
    stop_rx: Receiver<()>,
    poll_interval: Duration,
    done_tx: Sender<()>,
) -> Result<usize> {
    let _done = done_tx;
    let mut batches_written = 0usize;

    loop {
        match output_rx.recv_timeout(poll_interval) {
            Ok(batch) => {
                write_batch(&mut output, &batch)?;
                batches_written += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if output_rx.is_empty() && stop_requested(&stop_rx) {
            break;
        }
    }

    output.flush().context("Failed to flush output")?;
    debug!(batches_written, "writer stopped");
    Ok(batches_written)
}

pub(crate) fn write_batch<W: Write>(output: &mut W, batch: &OutputBatch) -> Result<()> {
    for record in &batch.records {
        serde_json::to_writer(&mut *output, record).context("Failed to write record")?;
        output.write_all(b"\n").context("Failed to write record")?;
    }
    output.flush().context("Failed to flush output")?;
    Ok(())
}
