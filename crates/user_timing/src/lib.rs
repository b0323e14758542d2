//! User Timing
//!
//! This crate is the process-wide timing namespace. Any code in the process can
//! drop a mark or record a measure here without knowing whether a profiler is
//! listening:
//! - A monotonic time origin captured on first use
//! - `mark` / `measure` primitives backed by a bounded performance timeline
//! - A single observer slot with an activation flag, used by tracing layers to
//!   see every native call
//! - RAII scope timing that issues a measure on drop
//!
//! # Example
//!
//! ```rust
//! use user_timing::{mark, measure, MeasureOptions, time_scope};
//!
//! fn load_config() {
//!     time_scope!("load-config");
//!     // ... work ...
//! }
//!
//! mark("start");
//! load_config();
//! let entry = measure("since-start", MeasureOptions::new().start_mark("start")).unwrap();
//! assert!(entry.duration >= 0.0);
//! ```

mod error;
pub mod observer;
mod origin;
mod timeline;
mod timing;

pub use error::{TimingError, TimingResult};
pub use observer::TimingObserver;
pub use origin::{time_origin, TimeOrigin};
pub use timeline::{
    clear_marks, clear_measures, get_entries_by_name, get_entries_by_type, mark, mark_with,
    measure, now, Boundary, EntryType, MarkOptions, MeasureOptions, PerformanceEntry,
};
pub use timing::ScopeTimer;
