//! Observer slot for intercepting timing calls.
//!
//! At most one observer is active per process. The activation flag is the single
//! source of truth: [`install`] claims it with a compare-and-swap, so a second
//! install attempt sees the flag already set and backs off without wrapping
//! anything twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::timeline::PerformanceEntry;

/// Receives every mark and measure recorded through this crate.
pub trait TimingObserver: Send + Sync {
    fn observe(&self, entry: &PerformanceEntry);
}

static INTERCEPTED: AtomicBool = AtomicBool::new(false);
static OBSERVER: RwLock<Option<Arc<dyn TimingObserver>>> = RwLock::new(None);

/// Whether an observer is currently installed.
pub fn is_intercepted() -> bool {
    INTERCEPTED.load(Ordering::Acquire)
}

/// Install `observer` if no observer is active.
///
/// Returns `false` and drops `observer` when the slot is already claimed.
pub fn install(observer: Arc<dyn TimingObserver>) -> bool {
    if INTERCEPTED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        tracing::debug!(target: "user_timing", "observer already installed");
        return false;
    }

    *OBSERVER.write().unwrap_or_else(|p| p.into_inner()) = Some(observer);
    tracing::debug!(target: "user_timing", "observer installed");
    true
}

/// Remove the active observer. Returns `false` if none was installed.
pub fn uninstall() -> bool {
    let mut slot = OBSERVER.write().unwrap_or_else(|p| p.into_inner());
    let removed = slot.take().is_some();
    INTERCEPTED.store(false, Ordering::Release);
    if removed {
        tracing::debug!(target: "user_timing", "observer uninstalled");
    }
    removed
}

pub(crate) fn notify(entry: &PerformanceEntry) {
    if !is_intercepted() {
        return;
    }

    let observer = OBSERVER
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .as_ref()
        .map(Arc::clone);

    if let Some(observer) = observer {
        observer.observe(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::mark;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        names: Mutex<Vec<String>>,
    }

    impl TimingObserver for Recorder {
        fn observe(&self, entry: &PerformanceEntry) {
            if entry.name.starts_with("observer-test") {
                self.names.lock().unwrap().push(entry.name.clone());
            }
        }
    }

    #[test]
    fn test_install_is_exclusive() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        assert!(install(first.clone()));
        assert!(is_intercepted());
        assert!(!install(second.clone()));

        let returned = mark("observer-test-once");
        assert_eq!(returned.name, "observer-test-once");

        assert_eq!(*first.names.lock().unwrap(), vec!["observer-test-once"]);
        assert!(second.names.lock().unwrap().is_empty());

        assert!(uninstall());
        assert!(!is_intercepted());
        assert!(!uninstall());

        mark("observer-test-after");
        assert_eq!(first.names.lock().unwrap().len(), 1);
    }
}
