//! Virtual time
//!
//! The sync engine never reads the wall clock. Callers hand it an `Instant`
//! (a tick count from any monotonic source) so retries and backoff are
//! deterministic under test.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A point in time, in nanoseconds since an arbitrary epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Instant {
    nanos: u64,
}

impl Instant {
    /// The epoch itself
    pub const ZERO: Instant = Instant { nanos: 0 };

    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Returns the duration since another instant, zero if `earlier` is later
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, duration: Duration) -> Self::Output {
        Instant::from_nanos(self.nanos.saturating_add(duration.as_nanos()))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, duration: Duration) -> Self::Output {
        Instant::from_nanos(self.nanos.saturating_sub(duration.as_nanos()))
    }
}

/// A span of virtual time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { nanos: 0 };

    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs.saturating_mul(1_000_000_000),
        }
    }

    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    pub const fn as_secs(&self) -> u64 {
        self.nanos / 1_000_000_000
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Multiplies by `factor`, clamping at `u64::MAX` nanoseconds
    pub fn saturating_mul(self, factor: u64) -> Duration {
        Duration::from_nanos(self.nanos.saturating_mul(factor))
    }

    /// Returns the smaller of two durations
    pub fn min(self, other: Duration) -> Duration {
        if self <= other {
            self
        } else {
            other
        }
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Self::Output {
        Duration::from_nanos(self.nanos.saturating_add(other.nanos))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Self::Output {
        Duration::from_nanos(self.nanos.saturating_sub(other.nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units_agree() {
        assert_eq!(Duration::from_secs(2), Duration::from_millis(2000));
        assert_eq!(Duration::from_millis(3).as_nanos(), 3_000_000);
        assert_eq!(Duration::from_secs(5).as_millis(), 5000);
    }

    #[test]
    fn test_instant_arithmetic_saturates() {
        let start = Instant::from_millis(10);
        assert_eq!(start + Duration::from_millis(5), Instant::from_millis(15));
        assert_eq!(start - Duration::from_secs(1), Instant::ZERO);
        assert_eq!(
            Instant::from_nanos(u64::MAX) + Duration::from_nanos(1),
            Instant::from_nanos(u64::MAX)
        );
    }

    #[test]
    fn test_duration_since_is_never_negative() {
        let early = Instant::from_millis(1);
        let late = Instant::from_millis(4);
        assert_eq!(late.duration_since(early), Duration::from_millis(3));
        assert_eq!(early.duration_since(late), Duration::ZERO);
    }

    #[test]
    fn test_saturating_mul_and_min() {
        let base = Duration::from_millis(1000);
        assert_eq!(base.saturating_mul(4), Duration::from_millis(4000));
        assert_eq!(
            Duration::from_nanos(u64::MAX).saturating_mul(2),
            Duration::from_nanos(u64::MAX)
        );
        assert_eq!(base.min(Duration::from_millis(10)), Duration::from_millis(10));
    }
}
