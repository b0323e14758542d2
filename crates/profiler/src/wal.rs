//! Durable write-ahead log of entries.
//!
//! One JSON object per line. Every append serializes the whole batch into a
//! single buffer before touching the file, so a batch either lands as complete
//! lines or fails before writing. A process killed mid-write can still leave a
//! truncated last line; [`read_wal`] reports it and keeps going.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::entry::Entry;
use crate::error::{ProfilerError, ProfilerResult};

/// Append-only writer for a WAL file.
#[derive(Debug)]
pub struct WalWriter {
    path: PathBuf,
    file: File,
    lines_written: u64,
}

impl WalWriter {
    /// Open `path` for appending, creating it and its parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> ProfilerResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProfilerError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ProfilerError::io(&path, e))?;

        tracing::debug!(path = %path.display(), "opened WAL");
        Ok(Self {
            path,
            file,
            lines_written: 0,
        })
    }

    /// Path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines appended through this writer.
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Append one line per entry, in order, and sync to disk.
    ///
    /// Returns the number of lines written. An empty batch touches nothing.
    pub fn append(&mut self, entries: &[Entry]) -> ProfilerResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut batch = Vec::with_capacity(entries.len() * 128);
        for entry in entries {
            encode_line(entry, &mut batch)?;
        }

        self.file
            .write_all(&batch)
            .and_then(|()| self.file.sync_data())
            .map_err(|e| ProfilerError::io(&self.path, e))?;

        self.lines_written += entries.len() as u64;
        tracing::trace!(path = %self.path.display(), lines = entries.len(), "appended to WAL");
        Ok(entries.len())
    }

    /// Sync and close the file.
    pub fn close(self) -> ProfilerResult<()> {
        self.file
            .sync_all()
            .map_err(|e| ProfilerError::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), lines = self.lines_written, "closed WAL");
        Ok(())
    }
}

/// Serialize `entry` as one newline-terminated line into `out`.
pub fn encode_line(entry: &Entry, out: &mut Vec<u8>) -> ProfilerResult<()> {
    serde_json::to_writer(&mut *out, entry)?;
    out.push(b'\n');
    Ok(())
}

/// An entry read back from a WAL with its 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub line: usize,
    pub entry: Entry,
}

/// A WAL line that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

impl From<SkippedLine> for ProfilerError {
    fn from(skipped: SkippedLine) -> Self {
        ProfilerError::MalformedEntry {
            line: skipped.line,
            reason: skipped.reason,
        }
    }
}

/// Everything read from a WAL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalContents {
    /// Parsed entries in file order
    pub records: Vec<WalRecord>,
    /// Lines that failed to parse
    pub skipped: Vec<SkippedLine>,
}

impl WalContents {
    /// Entries without line numbers, in file order.
    pub fn into_entries(self) -> Vec<Entry> {
        self.records.into_iter().map(|r| r.entry).collect()
    }
}

/// Read a WAL file from the start.
pub fn read_wal(path: impl AsRef<Path>) -> ProfilerResult<WalContents> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ProfilerError::io(path, e))?;
    parse_wal(BufReader::new(file)).map_err(|e| ProfilerError::io(path, e))
}

/// Parse WAL lines from `reader`.
///
/// Blank lines are ignored. Lines that are not valid entries, including a
/// truncated final line, are collected in [`WalContents::skipped`].
pub fn parse_wal(mut reader: impl BufRead) -> std::io::Result<WalContents> {
    let mut contents = WalContents::default();
    let mut buf = Vec::new();
    let mut line = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line += 1;

        let bytes = trim_line(&buf);
        if bytes.is_empty() {
            continue;
        }

        match serde_json::from_slice::<Entry>(bytes) {
            Ok(entry) => contents.records.push(WalRecord { line, entry }),
            Err(e) => contents.skipped.push(SkippedLine {
                line,
                reason: e.to_string(),
            }),
        }
    }

    Ok(contents)
}

fn trim_line(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
