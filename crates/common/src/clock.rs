//! Wall-clock abstraction.
//!
//! Presence decisions compare "now" against stored heartbeat timestamps.
//! Components take an `Arc<dyn Clock>` instead of calling `Utc::now()`
//! directly so liveness tests can move time explicitly.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use super::Clock;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::{Arc, RwLock};

    /// Clock that only moves when told to.
    ///
    /// Clones share the same underlying instant.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(RwLock::new(start)),
            }
        }

        /// Create a clock frozen at the current system time.
        #[must_use]
        pub fn starting_now() -> Self {
            Self::new(Utc::now())
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            if let Ok(mut now) = self.now.write() {
                *now += by;
            }
        }

        /// Jump to an absolute instant.
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut now) = self.now.write() {
                *now = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.read().map(|now| *now).unwrap_or_else(|_| Utc::now())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.advance(Duration::seconds(61));

        assert_eq!(clock.now(), start + Duration::seconds(61));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let shared = clock.clone();

        clock.advance(Duration::seconds(5));

        assert_eq!(shared.now(), start + Duration::seconds(5));
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
