//! Monotonic instant abstraction shared by every core module.
//!
//! Firmware wraps its hardware clock in a newtype implementing
//! [`TickInstant`]; the emulator and the test suites use [`MillisInstant`],
//! a plain millisecond counter with the same semantics.

use core::ops::Add;
use core::time::Duration;

/// Monotonic timestamp used to track step deadlines, lockouts and windows.
///
/// Implementations must be cheap to copy and totally ordered; adding a
/// [`Duration`] produces the corresponding later instant.
pub trait TickInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Millisecond-resolution instant backed by a plain counter.
///
/// Used by the host emulator and the deterministic test suites; the zero
/// value corresponds to device boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MillisInstant(u64);

impl MillisInstant {
    /// Creates an instant `value` milliseconds after boot.
    #[must_use]
    pub const fn from_millis(value: u64) -> Self {
        Self(value)
    }

    /// Returns the number of milliseconds since boot.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for MillisInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl TickInstant for MillisInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_and_elapsed_are_consistent() {
        let start = MillisInstant::from_millis(1_000);
        let later = start + Duration::from_millis(250);
        assert_eq!(later.as_millis(), 1_250);
        assert_eq!(
            later.saturating_duration_since(start),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn elapsed_saturates_instead_of_wrapping() {
        let early = MillisInstant::from_millis(10);
        let late = MillisInstant::from_millis(500);
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}
