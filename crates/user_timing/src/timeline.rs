//! Performance timeline with mark and measure primitives.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::{TimingError, TimingResult};
use crate::observer;
use crate::origin::time_origin;

/// Maximum number of entries retained on the timeline.
///
/// Oldest entries are evicted first. Observers see every entry regardless.
pub const MAX_TIMELINE_ENTRIES: usize = 10_000;

/// Global timeline instance
static TIMELINE: OnceLock<Mutex<VecDeque<PerformanceEntry>>> = OnceLock::new();

fn timeline() -> MutexGuard<'static, VecDeque<PerformanceEntry>> {
    let lock = TIMELINE.get_or_init(|| Mutex::new(VecDeque::new()));
    // A panic while holding the lock cannot leave the deque half-updated
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Kind of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Mark,
    Measure,
}

/// A mark or measure on the performance timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEntry {
    /// Name given by the caller
    pub name: String,
    /// Mark or measure
    pub entry_type: EntryType,
    /// Milliseconds since [`time_origin`]
    pub start_time: f64,
    /// Milliseconds; always zero for marks
    pub duration: f64,
    /// Caller-supplied payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Options for [`mark_with`].
#[derive(Debug, Clone, Default)]
pub struct MarkOptions {
    /// Explicit start time; defaults to now
    pub start_time: Option<f64>,
    /// Payload attached to the mark
    pub detail: Option<Value>,
}

impl MarkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One end of a measure.
#[derive(Debug, Clone, PartialEq)]
pub enum Boundary {
    /// The most recent mark with this name
    Mark(String),
    /// A timestamp in milliseconds since the time origin
    Time(f64),
}

/// Options for [`measure`].
///
/// With no start the measure begins at the time origin; with no end it ends now.
#[derive(Debug, Clone, Default)]
pub struct MeasureOptions {
    pub start: Option<Boundary>,
    pub end: Option<Boundary>,
    pub duration: Option<f64>,
    pub detail: Option<Value>,
}

impl MeasureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_mark(mut self, name: impl Into<String>) -> Self {
        self.start = Some(Boundary::Mark(name.into()));
        self
    }

    pub fn start_time(mut self, ms: f64) -> Self {
        self.start = Some(Boundary::Time(ms));
        self
    }

    pub fn end_mark(mut self, name: impl Into<String>) -> Self {
        self.end = Some(Boundary::Mark(name.into()));
        self
    }

    pub fn end_time(mut self, ms: f64) -> Self {
        self.end = Some(Boundary::Time(ms));
        self
    }

    pub fn with_duration(mut self, ms: f64) -> Self {
        self.duration = Some(ms);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Milliseconds since the time origin.
#[inline]
pub fn now() -> f64 {
    time_origin().elapsed_ms()
}

/// Record a mark at the current time.
pub fn mark(name: impl Into<String>) -> PerformanceEntry {
    mark_with(name, MarkOptions::default())
}

/// Record a mark with explicit options.
pub fn mark_with(name: impl Into<String>, options: MarkOptions) -> PerformanceEntry {
    let entry = PerformanceEntry {
        name: name.into(),
        entry_type: EntryType::Mark,
        start_time: options.start_time.unwrap_or_else(now),
        duration: 0.0,
        detail: options.detail,
    };

    tracing::trace!(target: "user_timing", name = %entry.name, start_time = entry.start_time, "mark");
    record(entry)
}

/// Record a measure between two boundaries.
///
/// Fails if a boundary names a mark that is not on the timeline.
pub fn measure(name: impl Into<String>, options: MeasureOptions) -> TimingResult<PerformanceEntry> {
    let (start_time, end_time) = {
        let entries = timeline();
        let resolve = |boundary: &Boundary| -> TimingResult<f64> {
            match boundary {
                Boundary::Time(ms) => Ok(*ms),
                Boundary::Mark(mark) => entries
                    .iter()
                    .rev()
                    .find(|e| e.entry_type == EntryType::Mark && &e.name == mark)
                    .map(|e| e.start_time)
                    .ok_or_else(|| TimingError::UnknownMark(mark.clone())),
            }
        };

        let start = options.start.as_ref().map(&resolve).transpose()?;
        let end = options.end.as_ref().map(&resolve).transpose()?;

        match (start, end, options.duration) {
            (Some(_), Some(_), Some(_)) => return Err(TimingError::OverSpecified),
            (Some(start), None, Some(duration)) => (start, start + duration),
            (None, Some(end), Some(duration)) => (end - duration, end),
            (start, end, _) => (start.unwrap_or(0.0), end.unwrap_or_else(now)),
        }
    };

    let entry = PerformanceEntry {
        name: name.into(),
        entry_type: EntryType::Measure,
        start_time,
        duration: end_time - start_time,
        detail: options.detail,
    };

    tracing::trace!(
        target: "user_timing",
        name = %entry.name,
        start_time = entry.start_time,
        duration = entry.duration,
        "measure"
    );
    Ok(record(entry))
}

fn record(entry: PerformanceEntry) -> PerformanceEntry {
    {
        let mut entries = timeline();
        if entries.len() >= MAX_TIMELINE_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
    }

    // Outside the timeline lock so observers may call back into this crate
    observer::notify(&entry);
    entry
}

/// All retained entries with the given name, oldest first.
pub fn get_entries_by_name(name: &str) -> Vec<PerformanceEntry> {
    timeline().iter().filter(|e| e.name == name).cloned().collect()
}

/// All retained entries of the given type, oldest first.
pub fn get_entries_by_type(entry_type: EntryType) -> Vec<PerformanceEntry> {
    timeline()
        .iter()
        .filter(|e| e.entry_type == entry_type)
        .cloned()
        .collect()
}

/// Remove marks with the given name, or all marks when `None`.
pub fn clear_marks(name: Option<&str>) {
    clear(EntryType::Mark, name);
}

/// Remove measures with the given name, or all measures when `None`.
pub fn clear_measures(name: Option<&str>) {
    clear(EntryType::Measure, name);
}

fn clear(entry_type: EntryType, name: Option<&str>) {
    timeline().retain(|e| e.entry_type != entry_type || name.is_some_and(|n| n != e.name));
}
