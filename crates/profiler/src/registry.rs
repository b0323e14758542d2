//! Process-level registry holding the active profiler.
//!
//! Library code should take an `Arc<Profiler>` explicitly. The registry exists
//! for the process entry point and for the timing interceptor, which has no
//! other way to find where native calls should go.

use std::sync::{Arc, RwLock};

use crate::config::ProfilerConfig;
use crate::error::ProfilerResult;
use crate::profiler::Profiler;

static ACTIVE: RwLock<Option<Arc<Profiler>>> = RwLock::new(None);

/// Make `profiler` the active one, returning the profiler it replaces.
pub fn set_active(profiler: Arc<Profiler>) -> Option<Arc<Profiler>> {
    ACTIVE
        .write()
        .unwrap_or_else(|p| p.into_inner())
        .replace(profiler)
}

/// The active profiler, if any.
pub fn active() -> Option<Arc<Profiler>> {
    ACTIVE.read().unwrap_or_else(|p| p.into_inner()).clone()
}

/// Remove and return the active profiler.
///
/// The caller decides when to [`close`](Profiler::close) it.
pub fn take_active() -> Option<Arc<Profiler>> {
    ACTIVE.write().unwrap_or_else(|p| p.into_inner()).take()
}

/// Return the active profiler, creating it from `config` on first use.
///
/// `config` is only called when no profiler is active.
pub fn get_or_init(config: impl FnOnce() -> ProfilerConfig) -> ProfilerResult<Arc<Profiler>> {
    if let Some(profiler) = active() {
        return Ok(profiler);
    }

    let mut slot = ACTIVE.write().unwrap_or_else(|p| p.into_inner());
    // Another thread may have won between the read and the write lock
    if let Some(profiler) = slot.as_ref() {
        return Ok(Arc::clone(profiler));
    }

    let profiler = Arc::new(Profiler::new(config())?);
    *slot = Some(Arc::clone(&profiler));
    tracing::debug!(path = %profiler.wal_path().display(), "registered active profiler");
    Ok(profiler)
}
