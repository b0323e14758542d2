//! Profiler
//!
//! Durable user-timing traces. Marks and measures are buffered in memory,
//! appended to a per-process JSONL write-ahead log as they are flushed, and
//! converted into a Chrome/Perfetto trace document when the profiler closes.
//!
//! - Entry model with typed visualization detail (track, color, properties)
//! - Global timing interceptor that routes `user_timing` calls into the
//!   active profiler
//! - Crash-tolerant WAL: a truncated tail costs one line, not the run
//! - Profiler facade with RAII measures that also record on panic and
//!   cancellation
//! - Trace converter producing `traceEvents` JSON
//! - Multi-process merger and the `trace-merge` binary
//!
//! Recording never fails instrumented code. Only configuration errors surface,
//! at construction; everything later is logged through `tracing` and swallowed.
//!
//! # Example
//!
//! ```rust,no_run
//! use profiler::{interceptor, registry, Detail, ProfilerConfig};
//!
//! let profiler = registry::get_or_init(|| ProfilerConfig::from_env().unwrap_or_default()).unwrap();
//! let _handle = interceptor::install();
//!
//! // Native calls anywhere in the process now land in the trace
//! user_timing::mark("native-start");
//!
//! profiler.marker("instant", None);
//! profiler.marker(
//!     "instant-details-devtools-error",
//!     Some(
//!         Detail::new()
//!             .with_color("error")
//!             .with_property("Error Type", "ValidationError")
//!             .with_tooltip("ValidationError: Invalid input data provided"),
//!     ),
//! );
//!
//! profiler.close();
//! ```
//!
//! # Modules
//!
//! - [`entry`] - Entries, detail, colors
//! - [`interceptor`] - Routing of native timing calls
//! - [`wal`] - Write-ahead log writer and reader
//! - [`profiler`] - The recording facade
//! - [`trace`] - Trace document model and converter
//! - [`merge`] - Multi-process merge
//! - [`registry`] - Process-level active profiler

mod config;
pub mod entry;
mod error;
pub mod interceptor;
pub mod merge;
pub mod profiler;
pub mod registry;
pub mod trace;
pub mod wal;

pub use config::{
    ProfilerConfig, ENV_ENABLED, ENV_EPOCH_US, ENV_FILE_BASE_NAME, ENV_OUT_DIR,
};
pub use entry::{
    current_process_id, current_thread_id, Color, Detail, Entry, EntryKind, RESERVED_DETAIL_KEYS,
};
pub use error::{ProfilerError, ProfilerResult};
pub use interceptor::InterceptorHandle;
pub use merge::{merge_files, merge_into, MergeReport, SkippedInput};
pub use profiler::{FailureClass, MarkOptions, MeasureOptions, Profiler, ProfilerStats};
pub use trace::{
    read_trace, summarize_skipped, write_trace, ConversionReport, Phase, TraceConverter,
    TraceDocument, TraceEvent,
};
pub use wal::{read_wal, SkippedLine, WalContents, WalRecord, WalWriter};
