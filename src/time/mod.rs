//! Monotonic time for deadlines and quantum accounting.
//!
//! [`Instant`] counts nanoseconds since the first time the runtime asked for
//! the clock in this process. Real-Time deadlines are absolute `Instant`s, so
//! they stay comparable across every runtime in the process.

pub mod tick;

pub use core::time::Duration;
pub use tick::{TickCounter, TICKS};

/// Default preemption quantum.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(10);

/// Default distance between "now" and the deadline assigned to a thread that
/// enters the Real-Time policy without an explicit one.
pub const DEFAULT_DEADLINE_OFFSET: Duration = Duration::from_millis(100);

static ORIGIN: spin::Once<std::time::Instant> = spin::Once::new();

fn origin() -> std::time::Instant {
    *ORIGIN.call_once(std::time::Instant::now)
}

/// Nanoseconds since the process-wide clock origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    /// Create an instant from nanoseconds since the origin.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the origin.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Read the monotonic clock.
    pub fn now() -> Self {
        let elapsed = origin().elapsed().as_nanos();
        Self(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }

    /// The instant `offset` from now.
    pub fn after(offset: Duration) -> Self {
        Self::now() + offset
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later than `self`.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl core::ops::Sub<Duration> for Instant {
    type Output = Self;

    fn sub(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_is_monotonic() {
        let a = Instant::now();
        let b = Instant::now();
        assert!(b >= a);
    }

    #[test]
    fn test_instant_arithmetic_saturates() {
        let t = Instant::from_nanos(1_000);
        assert_eq!((t + Duration::from_nanos(500)).as_nanos(), 1_500);
        assert_eq!((t - Duration::from_secs(1)).as_nanos(), 0);
        assert_eq!(Instant::from_nanos(u64::MAX) + Duration::from_secs(1), Instant::from_nanos(u64::MAX));
        assert_eq!(
            Instant::from_nanos(10).saturating_duration_since(Instant::from_nanos(20)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_after_is_in_the_future() {
        let now = Instant::now();
        assert!(Instant::after(DEFAULT_DEADLINE_OFFSET) > now);
    }
}
