//! Wall-clock access and duration quantization.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};

/// Default rounding granularity for persisted durations.
pub const DEFAULT_GRANULARITY_MS: i64 = 1000;

/// Source of the current time.
///
/// The tracker never calls `Utc::now()` directly so that session arithmetic
/// can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += Duration::milliseconds(ms);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Rounds a duration down to a multiple of `granularity_ms`.
///
/// A granularity of zero or less disables rounding. Negative durations
/// (clock skew) round to zero so they can never subtract tracked time.
#[must_use]
pub const fn round_ms(ms: i64, granularity_ms: i64) -> i64 {
    if ms <= 0 {
        return 0;
    }
    if granularity_ms <= 0 {
        return ms;
    }
    (ms / granularity_ms) * granularity_ms
}

/// Milliseconds elapsed from `from` to `to`.
#[must_use]
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    to.signed_duration_since(from).num_milliseconds()
}

/// The local calendar date a timestamp belongs to.
///
/// Day records are keyed by the user's local date, not the UTC date.
#[must_use]
pub fn day_key(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}
