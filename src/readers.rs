use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, Read};
use tracing::{debug, warn};

use crate::decompression::decompress;

/// Open the pipeline input: stdin when `files` is empty, otherwise the
/// files in order (`-` reads stdin in that position)
pub fn open_input(files: &[String]) -> Result<Box<dyn BufRead + Send>> {
    if files.is_empty() {
        return decompress(io::stdin()).context("Failed to read stdin");
    }

    for path in files.iter().filter(|path| path.as_str() != "-") {
        let metadata =
            fs::metadata(path).with_context(|| format!("Failed to open input file '{}'", path))?;
        if metadata.is_dir() {
            anyhow::bail!("Input '{}' is a directory", path);
        }
    }

    Ok(Box::new(MultiFileReader::new(files.to_vec())))
}

/// A multi-file reader that streams through files sequentially
///
/// A file whose last line lacks a newline gets one, so it never runs into
/// the first line of the next file.
pub struct MultiFileReader {
    files: VecDeque<String>,
    current: Option<Box<dyn BufRead + Send>>,
    mid_line: bool,
    newline_pending: bool,
}

impl MultiFileReader {
    pub fn new(files: Vec<String>) -> Self {
        Self {
            files: files.into(),
            current: None,
            mid_line: false,
            newline_pending: false,
        }
    }

    fn open_next(&mut self) -> io::Result<bool> {
        while let Some(path) = self.files.pop_front() {
            let opened = if path == "-" {
                decompress(io::stdin())
            } else {
                File::open(&path).and_then(decompress)
            };

            match opened {
                Ok(reader) => {
                    debug!(file = %path, "reading input");
                    self.current = Some(reader);
                    return Ok(true);
                }
                Err(e) => warn!(file = %path, error = %e, "skipping unreadable input"),
            }
        }
        Ok(false)
    }
}

impl BufRead for MultiFileReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        loop {
            if self.newline_pending {
                return Ok(b"\n");
            }
            if self.current.is_none() && !self.open_next()? {
                return Ok(&[]);
            }

            let exhausted = match self.current.as_mut() {
                Some(reader) => reader.fill_buf()?.is_empty(),
                None => true,
            };
            if !exhausted {
                break;
            }

            self.current = None;
            if self.mid_line {
                self.mid_line = false;
                self.newline_pending = true;
            }
        }

        match self.current.as_mut() {
            Some(reader) => reader.fill_buf(),
            None => Ok(&[]),
        }
    }

    fn consume(&mut self, amt: usize) {
        if amt == 0 {
            return;
        }
        if self.newline_pending {
            self.newline_pending = false;
            return;
        }
        if let Some(reader) = self.current.as_mut() {
            // The buffer is already filled, so this does not touch the source
            if let Ok(buf) = reader.fill_buf() {
                if let Some(&last) = buf.get(amt - 1) {
                    self.mid_line = last != b'\n';
                }
            }
            reader.consume(amt);
        }
    }
}

impl Read for MultiFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.fill_buf()?;
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    fn lines(mut reader: impl BufRead) -> Vec<String> {
        let mut out = Vec::new();
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 {
            out.push(line.trim_end_matches('\n').to_string());
            line.clear();
        }
        out
    }

    #[test]
    fn reads_files_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log.gz");
        fs::write(&a, "a1\na2").unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"b1\nb2\n").unwrap();
        fs::write(&b, encoder.finish().unwrap()).unwrap();

        let files = vec![
            a.to_string_lossy().into_owned(),
            b.to_string_lossy().into_owned(),
        ];
        let reader = open_input(&files).unwrap();
        assert_eq!(lines(reader), vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn empty_files_add_no_lines() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.log");
        let full = dir.path().join("full.log");
        fs::write(&empty, "").unwrap();
        fs::write(&full, "x\n").unwrap();

        let reader = MultiFileReader::new(vec![
            empty.to_string_lossy().into_owned(),
            full.to_string_lossy().into_owned(),
        ]);
        assert_eq!(lines(reader), vec!["x"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = open_input(&["/definitely/not/here.log".to_string()])
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("/definitely/not/here.log"));
    }

    #[test]
    fn directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        assert!(open_input(&[path]).is_err());
    }
}
