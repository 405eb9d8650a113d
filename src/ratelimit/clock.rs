//! Time sources for the limiters.

use std::sync::atomic::{AtomicI64, Ordering};

/// A source of "now" in epoch milliseconds.
///
/// The limiters never assume the clock is monotonic. A value that moves
/// backwards is treated as zero elapsed time.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
///
/// Used to drive the limiters through simulated time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `ms`.
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Move backward by `ms`, as a wall clock adjustment would.
    pub fn rewind(&self, ms: i64) {
        self.now.fetch_sub(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Milliseconds from `earlier` to `now`, clamped at zero.
pub(crate) fn elapsed_ms(now: i64, earlier: i64) -> u64 {
    now.saturating_sub(earlier).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);

        clock.rewind(500);
        assert_eq!(clock.now_ms(), 750);

        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_elapsed_clamps_regression() {
        assert_eq!(elapsed_ms(1_000, 400), 600);
        assert_eq!(elapsed_ms(400, 1_000), 0);
        assert_eq!(elapsed_ms(i64::MIN, i64::MAX), 0);
    }
}
