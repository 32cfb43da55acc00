//! Reader and batcher threads
//!
//! The read loop and the flush timer share one pending batch behind a
//! `Mutex`. A batch is pushed onto the input queue when it reaches
//! `batch_size` lines, or when `flush_after` elapsed since the previous
//! flush, whichever comes first.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{after, select, Receiver, Sender};
use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error_handling::LineError;
use crate::platform::SignalHandler;

use super::tracker::PipelineTracker;
use super::types::Batch;

#[derive(Debug)]
struct BatchBuffer {
    lines: Vec<String>,
    start_line_num: usize,
    next_id: u64,
    last_flush: Instant,
}

/// Pending batch shared between the read loop and the flush timer
#[derive(Debug, Clone)]
pub(crate) struct LineBatcher {
    buffer: Arc<Mutex<BatchBuffer>>,
    sender: Sender<Batch>,
    tracker: PipelineTracker,
    batch_size: usize,
    flush_after: Duration,
}

impl LineBatcher {
    pub(crate) fn new(
        sender: Sender<Batch>,
        tracker: PipelineTracker,
        batch_size: usize,
        flush_after: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            buffer: Arc::new(Mutex::new(BatchBuffer {
                lines: Vec::with_capacity(batch_size),
                start_line_num: 1,
                next_id: 0,
                last_flush: Instant::now(),
            })),
            sender,
            tracker,
            batch_size,
            flush_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchBuffer> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Flush timer panicked, recovering batch buffer");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn push(&self, line: String, line_num: usize) -> Result<()> {
        let mut buffer = self.lock();
        if buffer.lines.is_empty() {
            buffer.start_line_num = line_num;
        }
        buffer.lines.push(line);
        if buffer.lines.len() >= self.batch_size {
            self.send_locked(&mut buffer)?;
        }
        Ok(())
    }

    /// Flush whatever is pending
    pub(crate) fn flush(&self) -> Result<()> {
        let mut buffer = self.lock();
        if buffer.lines.is_empty() {
            return Ok(());
        }
        self.send_locked(&mut buffer)
    }

    pub(crate) fn flush_if_due(&self) -> Result<()> {
        let mut buffer = self.lock();
        if buffer.lines.is_empty() || buffer.last_flush.elapsed() < self.flush_after {
            return Ok(());
        }
        debug!(lines = buffer.lines.len(), "flushing partial batch on timer");
        self.send_locked(&mut buffer)
    }

    /// How long the flush timer may sleep before the pending batch is due
    pub(crate) fn time_until_due(&self) -> Duration {
        let buffer = self.lock();
        if buffer.lines.is_empty() {
            return self.flush_after;
        }
        self.flush_after.saturating_sub(buffer.last_flush.elapsed())
    }

    // Holding the lock while blocked on a full queue keeps the timer from
    // sending a second batch out of order.
    fn send_locked(&self, buffer: &mut BatchBuffer) -> Result<()> {
        let lines = std::mem::replace(&mut buffer.lines, Vec::with_capacity(self.batch_size));
        let batch = Batch {
            id: buffer.next_id,
            start_line_num: buffer.start_line_num,
            lines,
        };
        buffer.next_id += 1;
        buffer.last_flush = Instant::now();

        debug!(batch_id = batch.id, lines = batch.lines.len(), "batch ready");
        self.tracker.batch_enqueued();
        if let Err(err) = self.sender.send(batch) {
            let lost = err.into_inner().lines.len();
            self.tracker.batch_not_sent(lost);
            return Err(anyhow!("input queue closed, {} lines not processed", lost));
        }
        Ok(())
    }
}

/// Flush timer thread - pushes partial batches once they are due
pub(crate) fn flush_timer_thread(batcher: &LineBatcher, stop_rx: Receiver<()>) -> Result<()> {
    loop {
        let wait = batcher.time_until_due();
        select! {
            recv(stop_rx) -> _ => return Ok(()),
            recv(after(wait)) -> _ => batcher.flush_if_due()?,
        }
    }
}

/// Reader thread - reads lines until EOF and feeds the batcher.
///
/// Dropping `finished_tx` on return is the input-finished signal; every
/// batch has been enqueued (and counted in flight) by then.
pub(crate) fn reader_thread<R: BufRead>(
    mut reader: R,
    batcher: LineBatcher,
    tracker: PipelineTracker,
    finished_tx: Sender<()>,
) -> Result<usize> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

    let (read_result, timer_result) = thread::scope(|scope| {
        let timer = thread::Builder::new()
            .name("drainflow-flush".to_string())
            .spawn_scoped(scope, || flush_timer_thread(&batcher, stop_rx));

        let read_result = read_lines(&mut reader, &batcher, &tracker);
        let read_result = read_result.and_then(|lines| batcher.flush().map(|_| lines));
        drop(stop_tx);

        let timer_result = match timer {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(anyhow!("flush timer panicked"))),
            Err(err) => Err(err).context("Failed to spawn flush timer"),
        };
        (read_result, timer_result)
    });

    drop(finished_tx);

    let lines = read_result?;
    timer_result?;
    info!(lines, "input finished");
    Ok(lines)
}

fn read_lines<R: BufRead>(
    reader: &mut R,
    batcher: &LineBatcher,
    tracker: &PipelineTracker,
) -> Result<usize> {
    let mut line_num = 0usize;
    let mut buf = Vec::new();

    loop {
        if SignalHandler::should_terminate() {
            info!("termination requested, treating as end of input");
            break;
        }

        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .context("Failed to read input")?;
        if read == 0 {
            break;
        }

        line_num += 1;
        tracker.add_lines_read(1);

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }

        match String::from_utf8(std::mem::take(&mut buf)) {
            Ok(line) => batcher.push(line, line_num)?,
            Err(_) => tracker.record_reader_error(&LineError::InvalidUtf8, line_num),
        }
    }

    Ok(line_num)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded, TryRecvError};
    use std::io::{BufReader, Cursor, Read};

    fn numbered(count: usize) -> Cursor<Vec<u8>> {
        let text: String = (1..=count).map(|i| format!("line {}\n", i)).collect();
        Cursor::new(text.into_bytes())
    }

    /// Hands out one line per read call, sleeping before each
    struct Trickle {
        lines: Vec<Vec<u8>>,
        delay: Duration,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.lines.is_empty() {
                return Ok(0);
            }
            thread::sleep(self.delay);
            let line = self.lines.remove(0);
            buf[..line.len()].copy_from_slice(&line);
            Ok(line.len())
        }
    }

    #[test]
    fn flushes_full_batches_then_remainder() {
        let (tx, rx) = unbounded();
        let (finished_tx, finished_rx) = bounded::<()>(0);
        let tracker = PipelineTracker::new();
        let batcher = LineBatcher::new(tx, tracker.clone(), 100, Duration::from_secs(60));

        let lines = reader_thread(numbered(250), batcher, tracker.clone(), finished_tx).unwrap();
        assert_eq!(lines, 250);
        assert_eq!(finished_rx.try_recv(), Err(TryRecvError::Disconnected));

        let batches: Vec<Batch> = rx.try_iter().collect();
        let sizes: Vec<usize> = batches.iter().map(|b| b.lines.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(batches[1].start_line_num, 101);
        assert_eq!(batches[2].lines[0], "line 201");
        assert_eq!(batches[2].id, 2);
        assert_eq!(tracker.in_flight(), 3);
    }

    #[test]
    fn trickling_input_flushes_on_time() {
        let (tx, rx) = unbounded();
        let (finished_tx, _finished_rx) = bounded::<()>(0);
        let tracker = PipelineTracker::new();
        let flush_after = Duration::from_millis(150);
        let delay = Duration::from_millis(50);
        let batcher = LineBatcher::new(tx, tracker.clone(), 100, flush_after);
        let reader = BufReader::new(Trickle {
            lines: (0..10).map(|i| format!("tick {}\n", i).into_bytes()).collect(),
            delay,
        });

        reader_thread(reader, batcher, tracker, finished_tx).unwrap();

        let batches: Vec<Batch> = rx.try_iter().collect();
        assert!(batches.len() >= 2, "expected timed flushes, got {:?}", batches);

        // one extra line of slack for a late timer wakeup
        let max_lines = (flush_after.as_millis() / delay.as_millis()) as usize + 2;
        for batch in &batches {
            assert!(
                batch.lines.len() <= max_lines,
                "batch {} held {} lines, flush_after allows about {}",
                batch.id,
                batch.lines.len(),
                max_lines
            );
        }
        let all: Vec<String> = batches.into_iter().flat_map(|b| b.lines).collect();
        assert_eq!(all.len(), 10);
        assert_eq!(all[9], "tick 9");
    }

    #[test]
    fn full_input_queue_blocks_the_reader() {
        let (tx, rx) = bounded(10);
        let (finished_tx, finished_rx) = bounded::<()>(0);
        let tracker = PipelineTracker::new();
        let batcher = LineBatcher::new(tx, tracker.clone(), 1, Duration::from_secs(60));

        let reader_tracker = tracker.clone();
        let handle =
            thread::spawn(move || reader_thread(numbered(50), batcher, reader_tracker, finished_tx));

        let deadline = Instant::now() + Duration::from_secs(5);
        while rx.len() < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(100));

        assert_eq!(rx.len(), 10);
        assert!(!handle.is_finished());
        assert_eq!(finished_rx.try_recv(), Err(TryRecvError::Empty));
        assert!(tracker.stats().lines_read <= 11);

        drop(rx);
        assert!(handle.join().unwrap().is_err());
        assert_eq!(finished_rx.recv(), Err(crossbeam_channel::RecvError));
    }

    #[test]
    fn strips_line_endings_and_drops_invalid_utf8() {
        let (tx, rx) = unbounded();
        let (finished_tx, _finished_rx) = bounded::<()>(0);
        let tracker = PipelineTracker::new();
        let batcher = LineBatcher::new(tx, tracker.clone(), 10, Duration::from_secs(60));
        let input = Cursor::new(b"first\r\n\xff\xfe broken\nlast".to_vec());

        reader_thread(input, batcher, tracker.clone(), finished_tx).unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.lines, vec!["first", "last"]);
        assert_eq!(tracker.stats().lines_read, 3);
        assert_eq!(tracker.errors().count("invalid_utf8"), 1);
    }
}
