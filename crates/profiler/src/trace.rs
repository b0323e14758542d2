//! Trace Converter
//!
//! Turns WAL entries into a single trace-event document that Perfetto and
//! `chrome://tracing` can open.
//!
//! - Marks and instant track entries become thread-scoped instant events
//!   (`ph: "i"`)
//! - Other measures become complete events (`ph: "X"`) with a duration
//! - Detail is carried under `args.detail.devtools`, with an empty track name
//!   standing for the default lane
//! - Events are stably sorted by timestamp, so ties keep WAL line order
//!
//! Output is deterministic for a given input apart from `metadata.generatedAt`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use crate::entry::{Color, Detail, Entry, EntryKind};
use crate::error::{ProfilerError, ProfilerResult};
use crate::wal::{read_wal, SkippedLine};

/// Category stamped on every timed event.
pub const TRACE_CATEGORY: &str = "user_timing";

// =============================================================================
// Trace events
// =============================================================================

/// Trace event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "i")]
    Instant,
    #[serde(rename = "X")]
    Complete,
    #[serde(rename = "M")]
    Metadata,
}

/// A single event in the trace document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cat: Option<String>,
    pub ph: Phase,
    /// Microseconds
    #[serde(default)]
    pub ts: f64,
    /// Microseconds; complete events only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,
    pub pid: u32,
    pub tid: u64,
    /// Instant scope; `"t"` for thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Viewer color name derived from the detail color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl TraceEvent {
    /// Whether this is an instant or complete event.
    pub fn is_timed(&self) -> bool {
        self.ph != Phase::Metadata
    }

    /// The `args.detail.devtools` payload, if any.
    pub fn devtools(&self) -> Option<&Value> {
        self.args.as_ref()?.get("detail")?.get("devtools")
    }

    fn metadata(name: &str, pid: u32, tid: u64, label: String) -> Self {
        Self {
            name: name.to_string(),
            cat: None,
            ph: Phase::Metadata,
            ts: 0.0,
            dur: None,
            pid,
            tid,
            s: None,
            cname: None,
            args: Some(json!({ "name": label })),
        }
    }
}

/// How DevTools should draw an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    Marker,
    TrackEntry,
}

/// The `args.detail.devtools` payload of a timed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevtoolsPayload {
    data_type: DataType,
    track: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    track_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<Color>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    properties: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tooltip_text: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl DevtoolsPayload {
    fn new(data_type: DataType, detail: Option<Detail>) -> Self {
        let mut detail = detail.unwrap_or_default();
        detail.strip_reserved_extra();
        Self {
            data_type,
            track: detail.track.unwrap_or_default(),
            track_group: detail.track_group,
            color: detail.color,
            properties: detail.properties,
            tooltip_text: detail.tooltip_text,
            extra: detail.extra,
        }
    }
}

/// Map one entry to its trace event.
pub fn entry_to_event(entry: Entry) -> TraceEvent {
    let (ph, dur, s, data_type) = match entry.kind {
        EntryKind::Mark => (Phase::Instant, None, Some("t".to_string()), DataType::Marker),
        EntryKind::Measure if entry.instant => (
            Phase::Instant,
            None,
            Some("t".to_string()),
            DataType::TrackEntry,
        ),
        EntryKind::Measure => (
            Phase::Complete,
            Some(entry.duration_ms() * 1000.0),
            None,
            DataType::TrackEntry,
        ),
    };
    let cname = entry
        .detail
        .as_ref()
        .and_then(|d| d.color.as_ref())
        .and_then(viewer_color)
        .map(str::to_string);

    let payload = DevtoolsPayload::new(data_type, entry.detail);
    let args = serde_json::to_value(&payload)
        .map(|devtools| json!({ "detail": { "devtools": devtools } }))
        .ok();

    TraceEvent {
        name: entry.name,
        cat: Some(TRACE_CATEGORY.to_string()),
        ph,
        ts: entry.timestamp * 1000.0,
        dur,
        pid: entry.process_id,
        tid: entry.thread_id,
        s,
        cname,
        args,
    }
}

/// Closest reserved color name understood by `chrome://tracing`.
fn viewer_color(color: &Color) -> Option<&'static str> {
    match color {
        Color::Primary | Color::PrimaryLight | Color::PrimaryDark => Some("thread_state_running"),
        Color::Secondary | Color::SecondaryLight | Color::SecondaryDark => Some("rail_animation"),
        Color::Tertiary | Color::TertiaryLight | Color::TertiaryDark => Some("rail_idle"),
        Color::Error => Some("terrible"),
        Color::Other(_) => None,
    }
}

impl TryFrom<&TraceEvent> for Entry {
    type Error = ProfilerError;

    /// Lift an instant or complete event back into an entry.
    fn try_from(event: &TraceEvent) -> ProfilerResult<Self> {
        let track_entry = event
            .devtools()
            .and_then(|devtools| devtools.get("dataType"))
            .is_some_and(|data_type| data_type.as_str() == Some("track-entry"));
        let detail = event
            .devtools()
            .cloned()
            .map(Detail::from_value)
            .map(|mut detail| {
                if detail.track.as_deref() == Some("") {
                    detail.track = None;
                }
                detail
            })
            .filter(|detail| !detail.is_empty());

        let (kind, duration, instant) = match event.ph {
            Phase::Instant if track_entry => (EntryKind::Measure, Some(0.0), true),
            Phase::Instant => (EntryKind::Mark, None, false),
            Phase::Complete => (
                EntryKind::Measure,
                Some(event.dur.unwrap_or(0.0).max(0.0) / 1000.0),
                false,
            ),
            Phase::Metadata => {
                return Err(ProfilerError::UnsupportedEvent(format!(
                    "metadata event '{}' has no timestamp",
                    event.name
                )))
            }
        };

        Ok(Entry {
            kind,
            name: event.name.clone(),
            timestamp: event.ts / 1000.0,
            duration,
            detail,
            process_id: event.pid,
            thread_id: event.tid,
            instant,
        })
    }
}

// =============================================================================
// Trace document
// =============================================================================

/// The finalized trace file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDocument {
    pub trace_events: Vec<TraceEvent>,
    #[serde(default = "default_display_time_unit")]
    pub display_time_unit: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_display_time_unit() -> String {
    "ms".to_string()
}

impl TraceDocument {
    /// Instant and complete events, in document order.
    pub fn timed_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter().filter(|e| e.is_timed())
    }

    /// Instant events only.
    pub fn instant_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter().filter(|e| e.ph == Phase::Instant)
    }

    /// Complete events only.
    pub fn complete_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter().filter(|e| e.ph == Phase::Complete)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> ProfilerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Read a trace document.
pub fn read_trace(path: impl AsRef<Path>) -> ProfilerResult<TraceDocument> {
    let path = path.as_ref();
    let content = std::fs::read(path).map_err(|e| ProfilerError::io(path, e))?;
    Ok(serde_json::from_slice(&content)?)
}

/// Write a trace document, replacing any existing file.
///
/// Written to a sibling temp file first and renamed into place, so readers
/// never observe a half-written document.
pub fn write_trace(path: impl AsRef<Path>, document: &TraceDocument) -> ProfilerResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ProfilerError::io(parent, e))?;
    }

    let content = document.to_json()?;
    let tmp_path = path.with_extension("json.tmp");
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        ProfilerError::io(path, e)
    })?;

    tracing::debug!(path = %path.display(), events = document.trace_events.len(), "wrote trace");
    Ok(())
}

// =============================================================================
// Converter
// =============================================================================

/// One-line summary of skipped lines, or `None` if nothing was skipped.
pub fn summarize_skipped(skipped: &[SkippedLine]) -> Option<String> {
    let first = skipped.first()?;
    Some(format!(
        "skipped {} malformed WAL line(s), first at line {}: {}",
        skipped.len(),
        first.line,
        first.reason
    ))
}

/// Outcome of converting a WAL.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub document: TraceDocument,
    /// Lines dropped because they failed to parse
    pub skipped: Vec<SkippedLine>,
}

/// Converts entries into a [`TraceDocument`].
#[derive(Debug, Clone, Default)]
pub struct TraceConverter {
    metadata: BTreeMap<String, Value>,
}

impl TraceConverter {
    /// Create a converter that copies `metadata` into every document header.
    pub fn new(metadata: BTreeMap<String, Value>) -> Self {
        Self { metadata }
    }

    /// Read `wal` once from the start and convert it.
    ///
    /// Malformed lines are skipped rather than failing the run. Each one is
    /// logged at debug level and returned in the report; callers decide how
    /// to surface them (see [`summarize_skipped`]).
    pub fn convert_file(&self, wal: impl AsRef<Path>) -> ProfilerResult<ConversionReport> {
        let wal = wal.as_ref();
        let contents = read_wal(wal)?;

        for skipped in &contents.skipped {
            tracing::debug!(
                path = %wal.display(),
                line = skipped.line,
                "skipping malformed WAL line: {}",
                skipped.reason
            );
        }

        let mut document = self.convert_entries(contents.records.into_iter().map(|r| r.entry).collect());
        document
            .metadata
            .insert("skippedLines".to_string(), json!(contents.skipped.len()));
        document
            .metadata
            .insert("source".to_string(), json!(wal.display().to_string()));

        Ok(ConversionReport {
            document,
            skipped: contents.skipped,
        })
    }

    /// Convert entries given in WAL order.
    pub fn convert_entries(&self, mut entries: Vec<Entry>) -> TraceDocument {
        // Stable: equal timestamps keep their WAL order
        entries.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.build(entries)
    }

    /// Map entries that are already in their final order.
    pub(crate) fn build(&self, entries: Vec<Entry>) -> TraceDocument {
        let mut trace_events = Vec::with_capacity(entries.len() + 4);

        let mut processes = BTreeSet::new();
        let mut threads = BTreeSet::new();
        for entry in &entries {
            processes.insert(entry.process_id);
            threads.insert((entry.process_id, entry.thread_id));
        }
        for pid in processes {
            trace_events.push(TraceEvent::metadata("process_name", pid, 0, format!("Process {pid}")));
        }
        for (pid, tid) in threads {
            trace_events.push(TraceEvent::metadata("thread_name", pid, tid, format!("Thread {tid}")));
        }

        trace_events.extend(entries.into_iter().map(entry_to_event));

        let mut metadata = self.metadata.clone();
        metadata.insert(
            "generatedAt".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );

        TraceDocument {
            trace_events,
            display_time_unit: default_display_time_unit(),
            metadata,
        }
    }
}
