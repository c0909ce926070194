//! Tick counting for quantum expiry.

use portable_atomic::{AtomicU64, Ordering};

/// Monotonic count of preemption timer expirations.
///
/// The timer signal handler increments it and does nothing else. A running
/// thread's quantum has expired once the count moves past the value recorded
/// when the thread was dispatched.
pub struct TickCounter {
    ticks: AtomicU64,
}

impl TickCounter {
    /// Create a counter starting at zero.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Record one timer expiration.
    ///
    /// Async-signal-safe: a single atomic add, no allocation, no locks.
    #[inline]
    pub fn increment(&self) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }

    /// Current tick count.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Whether at least one tick happened since `since` was read.
    #[inline]
    pub fn elapsed_since(&self, since: u64) -> bool {
        self.ticks() != since
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide tick counter driven by the preemption timer.
pub static TICKS: TickCounter = TickCounter::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counter() {
        let counter = TickCounter::new();
        assert_eq!(counter.ticks(), 0);

        let seen = counter.ticks();
        assert!(!counter.elapsed_since(seen));

        counter.increment();
        assert_eq!(counter.ticks(), 1);
        assert!(counter.elapsed_since(seen));
    }
}
