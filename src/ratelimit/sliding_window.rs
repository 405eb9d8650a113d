//! Exact sliding window rate limiting.
//!
//! Every admitted request's timestamp is kept until it falls out of the
//! window, so the limit holds over any window-length span rather than over
//! fixed buckets.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use super::clock::{elapsed_ms, Clock};
use super::result::RateLimitResult;
use super::store::{MemoryStore, StateStore};

/// State for a single identifier's window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlidingWindow {
    /// Admitted request times (epoch ms), oldest first
    pub timestamps: VecDeque<i64>,
}

impl SlidingWindow {
    /// Drop timestamps that are `window_ms` or more behind `now`.
    fn prune(&mut self, now: i64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if elapsed_ms(now, oldest) < window_ms {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    /// Record a request, keeping the log ordered even if the clock stepped back.
    fn record(&mut self, now: i64) {
        let at = match self.timestamps.back() {
            Some(&latest) => latest.max(now),
            None => now,
        };
        self.timestamps.push_back(at);
    }

    /// Milliseconds until the oldest entry leaves the window.
    fn reset_ms(&self, now: i64, window_ms: u64) -> u64 {
        match self.timestamps.front() {
            Some(&oldest) => window_ms.saturating_sub(elapsed_ms(now, oldest)),
            None => window_ms,
        }
    }
}

/// A concurrent sliding window log limiter.
pub struct SlidingWindowLimiter<St = MemoryStore<SlidingWindow>> {
    windows: St,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with an in-memory store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(MemoryStore::new(), clock)
    }
}

impl<St: StateStore<SlidingWindow>> SlidingWindowLimiter<St> {
    /// Create a limiter on top of an existing store.
    pub fn with_store(windows: St, clock: Arc<dyn Clock>) -> Self {
        Self { windows, clock }
    }

    /// Try to record one request for `identifier` within the last `window_ms`.
    pub fn try_acquire(&self, identifier: &str, max_requests: u64, window_ms: u64) -> RateLimitResult {
        let now = self.clock.now_ms();

        let result = self.windows.update(
            identifier,
            || {
                debug!(identifier, max_requests, window_ms, "Creating new sliding window");
                SlidingWindow::default()
            },
            |window| {
                window.prune(now, window_ms);
                let count = window.timestamps.len() as u64;

                if count < max_requests {
                    window.record(now);
                    RateLimitResult::allowed(
                        max_requests,
                        max_requests - count - 1,
                        window.reset_ms(now, window_ms),
                    )
                } else {
                    RateLimitResult::denied(max_requests, window.reset_ms(now, window_ms))
                }
            },
        );

        trace!(
            identifier,
            success = result.success,
            remaining = result.remaining,
            "Sliding window decision"
        );
        if !result.success {
            debug!(identifier, reset_ms = result.reset_ms, "Sliding window full");
        }

        result
    }

    /// Requests currently recorded for `identifier`, without pruning.
    pub fn count(&self, identifier: &str) -> usize {
        self.windows
            .get(identifier)
            .map_or(0, |window| window.timestamps.len())
    }

    /// Prune every window against `max_age_ms` and drop the ones left empty.
    ///
    /// Returns the number of windows removed.
    pub fn cleanup(&self, max_age_ms: u64) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.windows.retain(|_, window| {
            window.prune(now, max_age_ms);
            let keep = !window.timestamps.is_empty();
            if !keep {
                removed += 1;
            }
            keep
        });

        debug!(removed, remaining = self.windows.len(), "Sliding window cleanup complete");
        removed
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no windows are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every window.
    pub fn clear(&self) {
        self.windows.clear();
    }
}
