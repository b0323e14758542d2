//! Multi-process merger.
//!
//! Worker processes each write their own WAL (or finished trace). Merging
//! concatenates them and sorts once by
//! `(timestamp, processId, threadId, input order, line order)`, so the output
//! does not depend on how the inputs happen to interleave on disk.
//!
//! Inputs ending in `.json` are read as trace documents; anything else is
//! read as a WAL.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::entry::Entry;
use crate::error::ProfilerResult;
use crate::trace::{read_trace, write_trace, TraceConverter, TraceDocument};
use crate::wal::{read_wal, SkippedLine};

/// An input that could not be read at all.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedInput {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub document: TraceDocument,
    pub inputs_merged: usize,
    pub skipped_inputs: Vec<SkippedInput>,
    /// Malformed WAL lines, by input path
    pub skipped_lines: Vec<(PathBuf, SkippedLine)>,
}

struct Keyed {
    input: usize,
    line: usize,
    entry: Entry,
}

/// Merge `inputs` into one document.
///
/// Unreadable inputs are logged and listed in the report rather than failing
/// the merge.
pub fn merge_files<P: AsRef<Path>>(
    inputs: &[P],
    metadata: BTreeMap<String, Value>,
) -> ProfilerResult<MergeReport> {
    let mut keyed = Vec::new();
    let mut skipped_inputs = Vec::new();
    let mut skipped_lines = Vec::new();
    let mut inputs_merged = 0;

    for (input, path) in inputs.iter().enumerate() {
        let path = path.as_ref();
        match load_input(path) {
            Ok((entries, skipped)) => {
                inputs_merged += 1;
                for skip in skipped {
                    tracing::debug!(
                        path = %path.display(),
                        line = skip.line,
                        "skipping malformed WAL line: {}",
                        skip.reason
                    );
                    skipped_lines.push((path.to_path_buf(), skip));
                }
                keyed.extend(
                    entries
                        .into_iter()
                        .map(|(line, entry)| Keyed { input, line, entry }),
                );
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping merge input: {}", e);
                skipped_inputs.push(SkippedInput {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if let Some(first) = skipped_lines.first() {
        let (path, line) = first;
        tracing::warn!(
            skipped = skipped_lines.len(),
            "skipping malformed WAL lines, first in {} at line {}: {}",
            path.display(),
            line.line,
            line.reason
        );
    }

    keyed.sort_by(|a, b| {
        a.entry
            .timestamp
            .total_cmp(&b.entry.timestamp)
            .then(a.entry.process_id.cmp(&b.entry.process_id))
            .then(a.entry.thread_id.cmp(&b.entry.thread_id))
            .then(a.input.cmp(&b.input))
            .then(a.line.cmp(&b.line))
    });

    let mut document = TraceConverter::new(metadata).build(keyed.into_iter().map(|k| k.entry).collect());
    document
        .metadata
        .insert("skippedLines".to_string(), json!(skipped_lines.len()));
    document.metadata.insert(
        "sources".to_string(),
        json!(inputs
            .iter()
            .map(|p| p.as_ref().display().to_string())
            .collect::<Vec<_>>()),
    );

    tracing::debug!(
        inputs = inputs_merged,
        skipped = skipped_inputs.len(),
        events = document.trace_events.len(),
        "merged traces"
    );

    Ok(MergeReport {
        document,
        inputs_merged,
        skipped_inputs,
        skipped_lines,
    })
}

/// Merge `inputs` and write the result to `out`.
pub fn merge_into<P: AsRef<Path>>(
    inputs: &[P],
    out: impl AsRef<Path>,
    metadata: BTreeMap<String, Value>,
) -> ProfilerResult<MergeReport> {
    let report = merge_files(inputs, metadata)?;
    write_trace(out, &report.document)?;
    Ok(report)
}

type Loaded = (Vec<(usize, Entry)>, Vec<SkippedLine>);

fn load_input(path: &Path) -> ProfilerResult<Loaded> {
    if path.extension().is_some_and(|ext| ext == "json") {
        let document = read_trace(path)?;
        // Event index stands in for the line number
        let entries = document
            .timed_events()
            .enumerate()
            .filter_map(|(i, event)| Entry::try_from(event).ok().map(|entry| (i + 1, entry)))
            .collect();
        return Ok((entries, Vec::new()));
    }

    let contents = read_wal(path)?;
    let entries = contents
        .records
        .into_iter()
        .map(|record| (record.line, record.entry))
        .collect();
    Ok((entries, contents.skipped))
}
