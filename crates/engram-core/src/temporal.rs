//! Time handling for EngramDB
//!
//! All timestamps are milliseconds since the Unix epoch. Engine code reads
//! time through [`Clock`] so that decay and momentum can be driven
//! deterministically in tests.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start` millis
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Move time forward
    pub fn advance_millis(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    /// Move time forward by whole seconds
    pub fn advance_secs(&self, secs: i64) {
        self.advance_millis(secs.saturating_mul(1000));
    }

    /// Jump to an absolute time
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a millisecond timestamp to a chrono datetime, for display
pub fn to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Seconds elapsed between two millisecond timestamps; never negative
pub fn elapsed_secs(from: i64, to: i64) -> f32 {
    (to.saturating_sub(from)).max(0) as f32 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);

        clock.advance_secs(2);
        assert_eq!(clock.now_millis(), 3_000);

        let shared = clock.clone();
        shared.advance_millis(5);
        assert_eq!(clock.now_millis(), 3_005);

        clock.set(10);
        assert_eq!(shared.now_millis(), 10);
    }

    #[test]
    fn test_elapsed_secs() {
        assert_eq!(elapsed_secs(1_000, 3_500), 2.5);
        assert_eq!(elapsed_secs(3_500, 1_000), 0.0);
    }

    #[test]
    fn test_to_datetime() {
        let dt = to_datetime(0).unwrap();
        assert_eq!(dt.timestamp(), 0);
    }
}
