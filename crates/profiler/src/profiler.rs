//! Profiler Facade
//!
//! The public face of the tracing subsystem. A [`Profiler`] owns an in-memory
//! buffer of entries and the WAL they are flushed into, and on [`Profiler::close`]
//! turns the WAL into a trace document.
//!
//! Instrumented code never sees a profiler failure: WAL and trace errors are
//! logged once per failure class and swallowed, and measured closures run
//! whether or not recording is enabled.
//!
//! # Example
//!
//! ```rust,no_run
//! use profiler::{Detail, MeasureOptions, Profiler, ProfilerConfig};
//!
//! let profiler = Profiler::new(ProfilerConfig::new("tmp/profiles")).unwrap();
//!
//! profiler.marker("startup", None);
//! let total = profiler.measure(
//!     "sum",
//!     MeasureOptions::new().with_detail(Detail::on_track("Compute")),
//!     || (1..=10).sum::<u32>(),
//! );
//! assert_eq!(total, 55);
//!
//! profiler.close();
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};
use user_timing::TimeOrigin;

use crate::config::ProfilerConfig;
use crate::entry::{current_process_id, current_thread_id, Detail, Entry};
use crate::error::ProfilerResult;
use crate::trace::{summarize_skipped, write_trace, ConversionReport, TraceConverter};
use crate::wal::WalWriter;

// =============================================================================
// Options
// =============================================================================

/// Options for [`Profiler::mark`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkOptions {
    pub detail: Option<Detail>,
    /// Milliseconds since the profiler epoch; defaults to now
    pub start_time: Option<f64>,
}

impl MarkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

/// Options for the `measure*` family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureOptions {
    /// Detail recorded on success
    pub detail: Option<Detail>,
    /// Detail recorded when [`Profiler::measure_result`] sees an `Err`
    pub error_detail: Option<Detail>,
}

impl MeasureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_error_detail(mut self, detail: Detail) -> Self {
        self.error_detail = Some(detail);
        self
    }

    /// Detail for a failed run: the caller's error detail, or one derived
    /// from `err` that stays on the success track.
    fn failure_detail<E: fmt::Display + ?Sized>(&self, err: &E) -> Detail {
        if let Some(detail) = &self.error_detail {
            return detail.clone();
        }
        let mut detail = Detail::for_error(err);
        if let Some(base) = &self.detail {
            detail.track = base.track.clone();
            detail.track_group = base.track_group.clone();
        }
        detail
    }
}

// =============================================================================
// Failure reporting
// =============================================================================

/// Kinds of swallowed failure; each is warned about once per profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    WalOpen,
    WalWrite,
    Conversion,
    MalformedEntry,
    TraceWrite,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureClass::WalOpen => "opening WAL",
            FailureClass::WalWrite => "writing WAL",
            FailureClass::Conversion => "converting WAL",
            FailureClass::MalformedEntry => "parsing WAL lines",
            FailureClass::TraceWrite => "writing trace",
        })
    }
}

/// Counters describing what a profiler has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilerStats {
    /// Entries accepted into the buffer
    pub entries_recorded: u64,
    /// Lines durably appended to the WAL
    pub lines_written: u64,
    /// Buffered entries lost to a failed flush
    pub entries_dropped: u64,
    /// Swallowed failures of any class
    pub write_failures: u64,
}

// =============================================================================
// Profiler
// =============================================================================

#[derive(Debug, Default)]
struct ProfilerState {
    buffer: Vec<Entry>,
    wal: Option<WalWriter>,
    closed: bool,
    warned: HashSet<FailureClass>,
    stats: ProfilerStats,
}

impl ProfilerState {
    fn report(&mut self, class: FailureClass, err: &dyn fmt::Display) {
        self.stats.write_failures += 1;
        if self.warned.insert(class) {
            tracing::warn!("Profiler failed {}: {}", class, err);
        } else {
            tracing::debug!("Profiler failed {} again: {}", class, err);
        }
    }
}

/// Records marks and measures into a WAL and finalizes them into a trace.
///
/// `Profiler` is `Send + Sync`; share it as `Arc<Profiler>`.
#[derive(Debug)]
pub struct Profiler {
    epoch: TimeOrigin,
    out_dir: PathBuf,
    stem: String,
    metadata: BTreeMap<String, Value>,
    flush_threshold: usize,
    enabled: AtomicBool,
    state: Mutex<ProfilerState>,
}

impl Profiler {
    /// Create a profiler from `config`.
    ///
    /// Fails only on invalid configuration. An enabled profiler opens its WAL
    /// right away; if that fails the failure is logged and the open is retried
    /// on each flush.
    pub fn new(config: ProfilerConfig) -> ProfilerResult<Self> {
        config.validate()?;

        let epoch = match config.epoch_unix_us {
            Some(unix_us) => TimeOrigin::from_unix_micros(unix_us),
            None => TimeOrigin::now(),
        };
        let stem = config.file_stem(current_process_id(), current_thread_id());

        tracing::debug!(
            out_dir = %config.out_dir.display(),
            stem = %stem,
            enabled = config.enabled,
            "created profiler"
        );

        let profiler = Self {
            epoch,
            out_dir: config.out_dir,
            stem,
            metadata: config.metadata,
            flush_threshold: config.flush_threshold,
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(ProfilerState::default()),
        };
        if profiler.is_enabled() {
            let mut state = profiler.lock();
            profiler.open_wal(&mut state);
        }
        Ok(profiler)
    }

    fn lock(&self) -> MutexGuard<'_, ProfilerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // -------------------------------------------------------------------------
    // Switches and paths
    // -------------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn recording on or off. Entries created while off are not buffered.
    pub fn enable_profiling(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The time origin entry timestamps are relative to.
    pub fn epoch(&self) -> &TimeOrigin {
        &self.epoch
    }

    /// Milliseconds since the epoch.
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed_ms()
    }

    /// `<out_dir>/<stem>.<ext>`; a leading dot on `ext` is ignored.
    pub fn file_path_for_ext(&self, ext: &str) -> PathBuf {
        let ext = ext.trim_start_matches('.');
        self.out_dir.join(format!("{}.{}", self.stem, ext))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.file_path_for_ext("jsonl")
    }

    pub fn trace_path(&self) -> PathBuf {
        self.file_path_for_ext("json")
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record an instant and return it.
    ///
    /// The entry is returned even when recording is disabled; it is just not
    /// buffered.
    pub fn mark(&self, name: impl Into<String>, options: MarkOptions) -> Entry {
        let timestamp = options.start_time.unwrap_or_else(|| self.now_ms());
        let entry = Entry::mark(name, timestamp, options.detail);
        self.record(entry.clone());
        entry
    }

    /// Record an instant with optional detail.
    pub fn marker(&self, name: impl Into<String>, detail: Option<Detail>) {
        self.mark(
            name,
            MarkOptions {
                detail,
                start_time: None,
            },
        );
    }

    /// Record a zero-length entry on a track, drawn as an instant.
    pub fn instant_track_entry(&self, name: impl Into<String>, detail: Option<Detail>) {
        let entry = Entry::track_entry(name, self.now_ms(), detail);
        self.record(entry);
    }

    /// Run `f` and record how long it took.
    ///
    /// The interval is recorded even if `f` panics; the panic keeps unwinding.
    pub fn measure<T>(&self, name: impl Into<String>, options: MeasureOptions, f: impl FnOnce() -> T) -> T {
        let _guard = MeasureGuard::start(self, name.into(), options.detail);
        f()
    }

    /// Like [`measure`](Self::measure) for fallible work.
    ///
    /// An `Err` is recorded with error detail: the caller's `error_detail`, or
    /// an error-colored detail naming the error type.
    pub fn measure_result<T, E: fmt::Display>(
        &self,
        name: impl Into<String>,
        options: MeasureOptions,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut guard = MeasureGuard::start(self, name.into(), options.detail.clone());
        let result = f();
        if let Err(err) = &result {
            guard.detail = Some(options.failure_detail(err));
        }
        result
    }

    /// Await `future` and record the interval from this call to its settlement.
    ///
    /// If the returned future is dropped before completing, the elapsed time
    /// is still recorded.
    pub fn measure_async<'a, F>(
        &'a self,
        name: impl Into<String>,
        options: MeasureOptions,
        future: F,
    ) -> impl Future<Output = F::Output> + 'a
    where
        F: Future + 'a,
    {
        let guard = MeasureGuard::start(self, name.into(), options.detail);
        async move {
            let output = future.await;
            drop(guard);
            output
        }
    }

    /// Buffer `entry`. Returns whether it was accepted.
    pub(crate) fn record(&self, entry: Entry) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let mut state = self.lock();
        if state.closed {
            return false;
        }

        tracing::trace!(name = %entry.name, kind = ?entry.kind, "recorded entry");
        state.buffer.push(entry);
        state.stats.entries_recorded += 1;

        if self.flush_threshold > 0 && state.buffer.len() >= self.flush_threshold {
            self.flush_locked(&mut state);
        }
        true
    }

    // -------------------------------------------------------------------------
    // Flush and close
    // -------------------------------------------------------------------------

    /// Write all buffered entries to the WAL, in order.
    ///
    /// A no-op when the buffer is empty or the profiler is closed.
    pub fn flush(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        self.flush_locked(&mut state);
    }

    fn flush_locked(&self, state: &mut ProfilerState) {
        if state.buffer.is_empty() {
            return;
        }

        if !self.open_wal(state) {
            state.stats.entries_dropped += state.buffer.len() as u64;
            state.buffer.clear();
            return;
        }

        let entries = std::mem::take(&mut state.buffer);
        let result = match state.wal.as_mut() {
            Some(wal) => wal.append(&entries),
            None => Ok(0),
        };

        match result {
            Ok(lines) => {
                state.stats.lines_written += lines as u64;
                tracing::debug!(lines, "flushed profiler buffer");
            }
            Err(e) => {
                state.stats.entries_dropped += entries.len() as u64;
                state.report(FailureClass::WalWrite, &e);
            }
        }
    }

    fn open_wal(&self, state: &mut ProfilerState) -> bool {
        if state.wal.is_some() {
            return true;
        }
        match WalWriter::open(self.wal_path()) {
            Ok(wal) => {
                state.wal = Some(wal);
                true
            }
            Err(e) => {
                state.report(FailureClass::WalOpen, &e);
                false
            }
        }
    }

    /// Flush, close the WAL and write the trace document.
    ///
    /// Terminal and idempotent: later calls return immediately, and later
    /// recording calls are ignored. The WAL is kept next to the trace.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        self.flush_locked(&mut state);
        state.closed = true;

        if let Some(wal) = state.wal.take() {
            if let Err(e) = wal.close() {
                state.report(FailureClass::WalWrite, &e);
            }
        }

        let document = match self.convert() {
            Ok(Some(report)) => {
                if let Some(summary) = summarize_skipped(&report.skipped) {
                    state.report(FailureClass::MalformedEntry, &summary);
                }
                report.document
            }
            Ok(None) => {
                tracing::debug!("profiler closed with nothing recorded");
                return;
            }
            Err(e) => {
                state.report(FailureClass::Conversion, &e);
                return;
            }
        };

        let trace_path = self.trace_path();
        match write_trace(&trace_path, &document) {
            Ok(()) => tracing::debug!(
                path = %trace_path.display(),
                events = document.trace_events.len(),
                "profiler closed"
            ),
            Err(e) => state.report(FailureClass::TraceWrite, &e),
        }
    }

    /// Convert the full WAL, or produce an empty document when recording
    /// is on but the WAL never opened.
    fn convert(&self) -> ProfilerResult<Option<ConversionReport>> {
        let mut metadata = self.metadata.clone();
        metadata.insert("timeOriginUnixUs".to_string(), json!(self.epoch.unix_micros()));
        let converter = TraceConverter::new(metadata);

        let wal_path = self.wal_path();
        if wal_path.exists() {
            return converter.convert_file(&wal_path).map(Some);
        }
        if self.is_enabled() {
            let mut document = converter.convert_entries(Vec::new());
            document.metadata.insert("skippedLines".to_string(), json!(0));
            return Ok(Some(ConversionReport {
                document,
                skipped: Vec::new(),
            }));
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Entries waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn stats(&self) -> ProfilerStats {
        self.lock().stats
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Measure guard
// =============================================================================

/// Records one measure when dropped.
struct MeasureGuard<'a> {
    profiler: &'a Profiler,
    name: String,
    start: f64,
    detail: Option<Detail>,
}

impl<'a> MeasureGuard<'a> {
    fn start(profiler: &'a Profiler, name: String, detail: Option<Detail>) -> Self {
        Self {
            profiler,
            name,
            start: profiler.now_ms(),
            detail,
        }
    }
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        let duration = self.profiler.now_ms() - self.start;
        let entry = Entry::measure(
            std::mem::take(&mut self.name),
            self.start,
            duration,
            self.detail.take(),
        );
        self.profiler.record(entry);
    }
}
