//! Global Timing Interceptor
//!
//! Routes every `user_timing::mark` and `user_timing::measure` call in the
//! process into the active profiler, so third-party code that only knows the
//! platform timing API still shows up in the trace.
//!
//! Installation is idempotent. The activation flag lives in
//! [`user_timing::observer`], and only the first [`install`] wins; later calls
//! get a handle that leaves the slot alone. A native call is therefore recorded
//! exactly once however many times `install` ran.
//!
//! Native return values are untouched: the observer only sees a copy of the
//! entry after the timeline has recorded it.

use std::sync::Arc;

use user_timing::observer;
use user_timing::{EntryType, PerformanceEntry, TimingObserver};

use crate::entry::{Detail, Entry};
use crate::profiler::Profiler;
use crate::registry;

/// Forwards native timing entries to the active profiler.
struct RegistryForwarder;

impl TimingObserver for RegistryForwarder {
    fn observe(&self, native: &PerformanceEntry) {
        // Pure pass-through when nothing is listening
        if let Some(profiler) = registry::active() {
            profiler.record(to_entry(&profiler, native));
        }
    }
}

/// Convert a native entry onto `profiler`'s timeline.
fn to_entry(profiler: &Profiler, native: &PerformanceEntry) -> Entry {
    let timestamp = profiler
        .epoch()
        .rebase_ms(user_timing::time_origin(), native.start_time);
    let detail = native
        .detail
        .clone()
        .map(Detail::from_value)
        .filter(|detail| !detail.is_empty());

    match native.entry_type {
        EntryType::Mark => Entry::mark(native.name.clone(), timestamp, detail),
        EntryType::Measure => Entry::measure(native.name.clone(), timestamp, native.duration, detail),
    }
}

/// Handle returned by [`install`].
#[derive(Debug)]
#[must_use = "dropping the handle keeps the interceptor installed; call uninstall to remove it"]
pub struct InterceptorHandle {
    owner: bool,
}

impl InterceptorHandle {
    /// Whether this handle performed the installation.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Remove the interceptor if this handle installed it.
    pub fn uninstall(self) -> bool {
        self.owner && uninstall()
    }
}

/// Start routing native timing calls into the active profiler.
///
/// Safe to call any number of times; only the first call installs anything.
pub fn install() -> InterceptorHandle {
    let owner = observer::install(Arc::new(RegistryForwarder));
    if owner {
        tracing::debug!("timing interceptor installed");
    }
    InterceptorHandle { owner }
}

/// Remove the interceptor regardless of which handle installed it.
pub fn uninstall() -> bool {
    observer::uninstall()
}

/// Whether native timing calls are currently intercepted.
pub fn is_active() -> bool {
    observer::is_intercepted()
}
