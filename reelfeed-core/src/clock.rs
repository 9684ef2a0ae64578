//! Time sources for TTL checks and disposal scheduling.
//!
//! Components never read wall-clock time directly; they hold an
//! `Arc<dyn Clock>` so tests can move time forward deterministically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Maximum time that can be advanced in a single operation (30 days).
const MAX_TIME_ADVANCE: Duration = Duration::from_secs(30 * 86400);

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant as a UTC timestamp.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Time only moves when [`ManualClock::advance`] is called and never goes
/// backwards.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
    start: DateTime<Utc>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl ManualClock {
    /// Creates a clock frozen at the given instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
            start,
        }
    }

    /// Creates a shareable clock frozen at the current wall-clock time.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Advances time by the given duration.
    ///
    /// # Panics
    ///
    /// Panics if duration exceeds 30 days (MAX_TIME_ADVANCE).
    pub fn advance(&self, duration: Duration) {
        assert!(
            duration <= MAX_TIME_ADVANCE,
            "Cannot advance time by more than 30 days"
        );
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
        *self.current.lock() += delta;
    }

    /// Returns time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        (*self.current.lock() - self.start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Converts a signed chrono delta into a std duration, clamping negatives to zero.
pub(crate) fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advancement() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(15));
        assert!(clock.now() > start);
    }

    #[test]
    #[should_panic(expected = "Cannot advance time by more than 30 days")]
    fn test_manual_clock_max_advance_limit() {
        let clock = ManualClock::default();
        clock.advance(Duration::from_secs(30 * 86400 + 1));
    }

    #[test]
    fn test_elapsed_between_clamps_negative() {
        let clock = ManualClock::default();
        let earlier = clock.now();
        clock.advance(Duration::from_secs(3));

        assert_eq!(
            elapsed_between(earlier, clock.now()),
            Duration::from_secs(3)
        );
        assert_eq!(elapsed_between(clock.now(), earlier), Duration::ZERO);
    }
}
