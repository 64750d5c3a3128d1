//! Quota intervals, counter records and the clock they are measured with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Time interval a quota is measured over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// Per-second quota
    Second,
    /// Per-minute quota
    Minute,
    /// Per-hour quota
    Hour,
}

impl Interval {
    /// Intervals in evaluation order.
    pub const ALL: [Interval; 3] = [Interval::Second, Interval::Minute, Interval::Hour];

    /// Length of this interval in whole seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::Second => 1,
            Interval::Minute => 60,
            Interval::Hour => 3600,
        }
    }

    /// Get the duration of this interval.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds() as u64)
    }

    /// Lower-case name used in counting keys and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Second => "second",
            Interval::Minute => "minute",
            Interval::Hour => "hour",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Requests seen in the current window, including the one being evaluated
    pub count: u64,
    /// Unix timestamp (seconds) of the first request in the window
    pub window_start: i64,
}

impl CounterRecord {
    /// A fresh window opened by a single request at `now`.
    pub fn fresh(now: i64) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    /// Whether the window that started at `window_start` still covers `now`.
    ///
    /// The window is the half-open span `[window_start, window_start + interval)`.
    pub fn is_live(&self, now: i64, interval: Interval) -> bool {
        now - self.window_start < interval.seconds()
    }
}

/// Source of wall-clock time in unix seconds.
pub trait Clock: Send + Sync {
    /// Current unix timestamp in seconds.
    fn now(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to. Used to drive window tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Set the clock to an absolute timestamp.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
