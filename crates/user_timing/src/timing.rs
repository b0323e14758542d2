//! RAII scope timing on top of the timeline.

use std::borrow::Cow;

use crate::timeline::{measure, now, MeasureOptions, PerformanceEntry};

/// A timer that records a measure from creation to drop.
///
/// The measure goes through [`measure`](crate::measure), so an installed
/// observer sees it like any other native call.
///
/// # Example
///
/// ```rust
/// use user_timing::ScopeTimer;
///
/// fn process_batch() {
///     let _timer = ScopeTimer::new("batch");
///     // ... processing code ...
///     // Measure recorded on drop
/// }
/// ```
pub struct ScopeTimer {
    name: Cow<'static, str>,
    start: f64,
    active: bool,
}

impl ScopeTimer {
    /// Create a new timer with the given name.
    ///
    /// The timer starts immediately upon creation.
    #[inline]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            start: now(),
            active: true,
        }
    }

    /// Get the elapsed time in milliseconds.
    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        now() - self.start
    }

    /// Get the name of this timer.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start time in milliseconds since the time origin.
    #[inline]
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Stop the timer and return the recorded measure.
    pub fn stop(mut self) -> Option<PerformanceEntry> {
        self.record()
    }

    /// Stop the timer without recording anything.
    pub fn cancel(mut self) {
        self.active = false;
    }

    fn record(&mut self) -> Option<PerformanceEntry> {
        if !std::mem::replace(&mut self.active, false) {
            return None;
        }
        measure(
            self.name.to_string(),
            MeasureOptions::new().start_time(self.start),
        )
        .ok()
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        self.record();
    }
}

/// Macro for easy scope timing.
///
/// Creates a timer that records a measure when the scope ends.
///
/// # Example
///
/// ```rust
/// use user_timing::time_scope;
///
/// fn do_work() {
///     time_scope!("work");
///     // ... work ...
/// } // Measure recorded here
/// ```
#[macro_export]
macro_rules! time_scope {
    ($name:expr) => {
        let _timer = $crate::ScopeTimer::new($name);
    };
}
