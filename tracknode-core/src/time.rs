//! Time handling for the tracker
//!
//! Two distinct concerns live here:
//! - [`TimeSource`]: a monotonic millisecond clock driving cadence decisions,
//!   with a settable implementation for tests.
//! - [`UtcDateTime`]: the calendar tuple reported by the modem RTC and the
//!   GNSS fix, converted to epoch time for telemetry timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Milliseconds since an arbitrary origin (boot for monotonic sources,
/// the Unix epoch for wall-clock sources).
pub type Timestamp = u64;

/// Source of the scheduler's notion of "now".
pub trait TimeSource {
    /// Current timestamp in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Monotonic clock counting from construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Start counting from zero at the moment of the call.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }
}

/// Wall-clock source reporting Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Settable clock for tests.
///
/// Clones share the same underlying counter, so a test can hold one handle
/// and advance time while the scheduler reads through another.
#[derive(Debug, Clone, Default)]
pub struct FixedClock(Arc<AtomicU64>);

impl FixedClock {
    /// Create a clock reading `ms`.
    pub fn new(ms: Timestamp) -> Self {
        Self(Arc::new(AtomicU64::new(ms)))
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: Timestamp) {
        self.0.store(ms, Ordering::SeqCst);
    }

    /// Move time forward.
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

/// Calendar date and time in UTC, as reported by the modem RTC or a GNSS fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcDateTime {
    /// Full year (e.g. 2024). A year before the modem clock was ever set
    /// shows up as a small value and is filtered by the scheduler.
    pub year: i32,
    /// Month, 1-12.
    pub month: u8,
    /// Day of month, 1-31.
    pub day: u8,
    /// Hour, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
    /// Second, 0-59.
    pub second: u8,
}

// Proleptic Gregorian day arithmetic. Day 1 is 0001-01-01.
const DAYS_IN_MONTH: [i64; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const EPOCH_ORDINAL: i64 = 719_163; // ordinal of 1970-01-01

fn is_leap(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_before_year(year: i32) -> i64 {
    let y = i64::from(year) - 1;
    y * 365 + y / 4 - y / 100 + y / 400
}

fn days_before_month(year: i32, month: u8) -> i64 {
    let mut days = 0;
    for m in 1..month {
        days += DAYS_IN_MONTH[m as usize];
    }
    if month > 2 && is_leap(year) {
        days += 1;
    }
    days
}

impl UtcDateTime {
    /// Construct from the usual six-field tuple order.
    pub fn new(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Seconds since the Unix epoch.
    ///
    /// Dates before 1970 produce negative values; the caller decides whether
    /// those are meaningful (the scheduler discards implausible ones before
    /// ever converting).
    pub fn to_unix(&self) -> i64 {
        let ordinal =
            days_before_year(self.year) + days_before_month(self.year, self.month) + i64::from(self.day);
        let days = ordinal - EPOCH_ORDINAL;
        ((days * 24 + i64::from(self.hour)) * 60 + i64::from(self.minute)) * 60
            + i64::from(self.second)
    }

    /// Milliseconds since the Unix epoch, clamped at zero.
    pub fn to_unix_ms(&self) -> Timestamp {
        (self.to_unix().max(0) as u64) * 1000
    }
}
