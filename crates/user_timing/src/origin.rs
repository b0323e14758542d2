//! Monotonic time origin anchored to wall-clock time.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Process-wide time origin for the timing namespace.
static TIME_ORIGIN: OnceLock<TimeOrigin> = OnceLock::new();

/// Get the time origin of the timing namespace.
///
/// Captured the first time any timing primitive runs.
pub fn time_origin() -> &'static TimeOrigin {
    TIME_ORIGIN.get_or_init(TimeOrigin::now)
}

/// A point in time that timestamps are measured from.
///
/// Pairs a monotonic [`Instant`] with the wall-clock reading taken at the same
/// moment, so two processes that share the wall-clock value also share a
/// timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOrigin {
    instant: Instant,
    unix_us: u64,
}

impl TimeOrigin {
    /// Capture an origin at the current moment.
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            unix_us: unix_now_us(),
        }
    }

    /// Rebuild an origin from a wall-clock reading captured elsewhere.
    ///
    /// Used by worker processes to line their timestamps up with the parent's.
    pub fn from_unix_micros(unix_us: u64) -> Self {
        let now = Instant::now();
        let now_us = unix_now_us();

        let instant = if unix_us <= now_us {
            now.checked_sub(Duration::from_micros(now_us - unix_us))
        } else {
            now.checked_add(Duration::from_micros(unix_us - now_us))
        };

        Self {
            instant: instant.unwrap_or(now),
            unix_us,
        }
    }

    /// Wall-clock microseconds since the Unix epoch at the origin.
    pub fn unix_micros(&self) -> u64 {
        self.unix_us
    }

    /// The monotonic instant of the origin.
    pub fn instant(&self) -> Instant {
        self.instant
    }

    /// Milliseconds elapsed since the origin.
    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.ms_at(Instant::now())
    }

    /// Milliseconds between the origin and `instant`; negative if `instant`
    /// precedes the origin.
    pub fn ms_at(&self, instant: Instant) -> f64 {
        if instant >= self.instant {
            instant.duration_since(self.instant).as_secs_f64() * 1000.0
        } else {
            -(self.instant.duration_since(instant).as_secs_f64() * 1000.0)
        }
    }

    /// Convert a timestamp relative to `other` into one relative to `self`.
    pub fn rebase_ms(&self, other: &TimeOrigin, ms: f64) -> f64 {
        self.ms_at(other.instant) + ms
    }
}

fn unix_now_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
