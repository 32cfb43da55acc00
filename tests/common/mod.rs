// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use crossbeam_channel::Receiver;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};

use drainflow::parallel::PipelineConfig;

/// Run the drainflow binary with `input` on stdin, isolated from any user config
pub fn run_drainflow_with_input(args: &[&str], input: &str) -> (String, String, i32) {
    run_drainflow_with_bytes(args, input.as_bytes())
}

pub fn run_drainflow_with_bytes(args: &[&str], input: &[u8]) -> (String, String, i32) {
    let home = TempDir::new().expect("Failed to create temp home");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_drainflow"))
        .args(args)
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start drainflow");

    if let Some(mut stdin) = cmd.stdin.take() {
        stdin.write_all(input).expect("Failed to write to stdin");
    }

    let output = cmd.wait_with_output().expect("Failed to read output");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Run drainflow with `file_content` in a temporary file appended to `args`
pub fn run_drainflow_with_file(args: &[&str], file_content: &str) -> (String, String, i32) {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(file_content.as_bytes())
        .expect("Failed to write to temp file");

    let mut full_args = args.to_vec();
    full_args.push(temp_file.path().to_str().unwrap());
    run_drainflow_with_input(&full_args, "")
}

/// Parse NDJSON output, failing on any line that is not JSON
pub fn parse_records(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).expect("Output line should be valid JSON"))
        .collect()
}

/// Settings with short timers for tests
pub fn test_settings(num_processors: usize, batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        sync_period: Duration::from_secs(60),
        sync_jitter: Duration::ZERO,
        num_processors,
        batch_size,
        flush_after: Duration::from_millis(50),
        input_queue_capacity: 10,
        output_queue_capacity: 4 * num_processors,
        poll_interval: Duration::from_millis(10),
        worker_stop_timeout: Duration::from_secs(5),
    }
}

pub fn numbered_lines(count: usize) -> String {
    (1..=count)
        .map(|i| format!("request {} served in {} ms\n", i, i % 17))
        .collect()
}

/// Writer whose clones share one buffer
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn records(&self) -> Vec<Value> {
        parse_records(&self.contents())
    }

    pub fn line_count(&self) -> usize {
        self.contents().lines().count()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FlushLog {
    pending: Vec<u8>,
    flushed_lines: Vec<usize>,
}

/// Records how many complete lines reached it between flushes
#[derive(Clone, Default)]
pub struct FlushRecorder(Arc<Mutex<FlushLog>>);

impl FlushRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flushed_lines(&self) -> Vec<usize> {
        self.0.lock().unwrap().flushed_lines.clone()
    }
}

impl Write for FlushRecorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut log = self.0.lock().unwrap();
        let lines = log.pending.iter().filter(|&&b| b == b'\n').count();
        if lines > 0 {
            log.flushed_lines.push(lines);
            log.pending.clear();
        }
        Ok(())
    }
}

/// Input that yields whatever the test sends; EOF once the sender is dropped
pub struct ChannelReader {
    rx: Receiver<String>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub fn new(rx: Receiver<String>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk.into_bytes();
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
