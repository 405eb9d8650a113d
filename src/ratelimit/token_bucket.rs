//! Token bucket rate limiting.
//!
//! Each identifier gets a bucket that starts full and regains `refill_rate`
//! tokens for every whole `refill_interval_ms` that has elapsed. Refill is
//! computed lazily when the bucket is touched; there are no timers. Every
//! admitted request consumes exactly one token.

use std::sync::Arc;
use tracing::{debug, trace};

use super::clock::{elapsed_ms, Clock};
use super::result::RateLimitResult;
use super::store::{MemoryStore, StateStore};

/// State for a single identifier's bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    /// Tokens currently available, never above capacity
    pub tokens: f64,
    /// When tokens were last topped up (epoch ms)
    pub last_refill: i64,
}

/// A concurrent token bucket limiter.
///
/// Capacity and refill parameters are supplied per call, so one limiter can
/// serve identifiers with different policies.
pub struct TokenBucketLimiter<St = MemoryStore<TokenBucket>> {
    buckets: St,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a limiter with an in-memory store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(MemoryStore::new(), clock)
    }
}

impl<St: StateStore<TokenBucket>> TokenBucketLimiter<St> {
    /// Create a limiter on top of an existing store.
    pub fn with_store(buckets: St, clock: Arc<dyn Clock>) -> Self {
        Self { buckets, clock }
    }

    /// Try to take one token from `identifier`'s bucket.
    pub fn try_acquire(
        &self,
        identifier: &str,
        max_tokens: u64,
        refill_rate: f64,
        refill_interval_ms: u64,
    ) -> RateLimitResult {
        let now = self.clock.now_ms();
        let capacity = max_tokens as f64;
        let refills = refill_interval_ms > 0 && refill_rate > 0.0;

        let result = self.buckets.update(
            identifier,
            || {
                debug!(identifier, max_tokens, "Creating new token bucket");
                TokenBucket {
                    tokens: capacity,
                    last_refill: now,
                }
            },
            |bucket| {
                if refills {
                    let intervals = elapsed_ms(now, bucket.last_refill) / refill_interval_ms;
                    if intervals > 0 {
                        bucket.tokens = (bucket.tokens + intervals as f64 * refill_rate).min(capacity);
                        bucket.last_refill = now;
                    }
                }

                // A smaller capacity than the bucket was created with.
                if bucket.tokens > capacity {
                    bucket.tokens = capacity;
                }

                let since_refill = elapsed_ms(now, bucket.last_refill);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    let reset = if refills {
                        time_until_full(bucket.tokens, capacity, refill_rate, refill_interval_ms, since_refill)
                    } else {
                        0
                    };
                    RateLimitResult::allowed(max_tokens, bucket.tokens.floor() as u64, reset)
                } else {
                    let reset = if refills {
                        time_until_tokens(1.0 - bucket.tokens, refill_rate, refill_interval_ms, since_refill)
                    } else {
                        0
                    };
                    RateLimitResult::denied(max_tokens, reset)
                }
            },
        );

        trace!(
            identifier,
            success = result.success,
            remaining = result.remaining,
            "Token bucket decision"
        );
        if !result.success {
            debug!(identifier, reset_ms = result.reset_ms, "Token bucket exhausted");
        }

        result
    }

    /// Give one token back to `identifier`'s bucket, never exceeding
    /// `max_tokens`. Does nothing if the bucket does not exist.
    pub fn restore(&self, identifier: &str, max_tokens: u64) {
        let capacity = max_tokens as f64;
        self.buckets.modify(identifier, |bucket| {
            bucket.tokens = (bucket.tokens + 1.0).min(capacity);
        });
    }

    /// Tokens currently in `identifier`'s bucket, without refilling.
    pub fn tokens(&self, identifier: &str) -> Option<f64> {
        self.buckets.get(identifier).map(|bucket| bucket.tokens)
    }

    /// Remove buckets that have not been refilled within `max_age_ms`.
    ///
    /// Returns the number of buckets removed.
    pub fn cleanup(&self, max_age_ms: u64) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.buckets.retain(|_, bucket| {
            let keep = elapsed_ms(now, bucket.last_refill) <= max_age_ms;
            if !keep {
                removed += 1;
            }
            keep
        });

        debug!(removed, remaining = self.buckets.len(), "Token bucket cleanup complete");
        removed
    }

    /// Number of tracked buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no buckets are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

/// Estimated milliseconds until a bucket holding `tokens` is full again.
fn time_until_full(
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    refill_interval_ms: u64,
    since_refill: u64,
) -> u64 {
    time_until_tokens(capacity - tokens, refill_rate, refill_interval_ms, since_refill)
}

/// Milliseconds until `missing` more tokens have been added, counting whole
/// intervals from the last refill.
fn time_until_tokens(missing: f64, refill_rate: f64, refill_interval_ms: u64, since_refill: u64) -> u64 {
    if missing <= 0.0 {
        return 0;
    }

    let intervals = (missing / refill_rate).ceil();
    let total = intervals * refill_interval_ms as f64;
    // float-to-int casts saturate
    (total as u64).saturating_sub(since_refill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter() -> (Arc<ManualClock>, TokenBucketLimiter) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = TokenBucketLimiter::new(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_burst_then_deny() {
        let (_clock, limiter) = limiter();

        let results: Vec<_> = (0..7)
            .map(|_| limiter.try_acquire("u1", 5, 1.0, 1000))
            .collect();

        let admitted: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(admitted, vec![true, true, true, true, true, false, false]);

        assert_eq!(results[0].remaining, 4);
        assert_eq!(results[4].remaining, 0);
        assert_eq!(results[5].remaining, 0);
        assert_eq!(results[5].limit, 5);
        assert_eq!(results[5].retry_after, Some(1));
    }

    #[test]
    fn test_refill_admits_bounded_by_capacity() {
        for k in 0..6u64 {
            let (clock, limiter) = limiter();
            let (n, r, i) = (4u64, 2.0, 500u64);

            for _ in 0..n {
                assert!(limiter.try_acquire("k", n, r, i).success);
            }
            assert!(!limiter.try_acquire("k", n, r, i).success);

            clock.advance((k * i) as i64);

            let mut admitted = 0;
            while limiter.try_acquire("k", n, r, i).success {
                admitted += 1;
            }
            assert_eq!(admitted, (2 * k).min(n), "k = {}", k);
        }
    }

    #[test]
    fn test_partial_interval_carries_over() {
        let (clock, limiter) = limiter();

        assert!(limiter.try_acquire("p", 1, 1.0, 1000).success);

        clock.advance(600);
        let denied = limiter.try_acquire("p", 1, 1.0, 1000);
        assert!(!denied.success);
        assert_eq!(denied.reset_ms, 400);
        assert_eq!(denied.retry_after, Some(1));

        // The first 600ms were not thrown away.
        clock.advance(400);
        assert!(limiter.try_acquire("p", 1, 1.0, 1000).success);
    }

    #[test]
    fn test_fractional_rate_reset_waits_for_whole_token() {
        let (clock, limiter) = limiter();

        assert!(limiter.try_acquire("f", 1, 0.5, 1000).success);
        clock.advance(300);
        let denied = limiter.try_acquire("f", 1, 0.5, 1000);
        assert!(!denied.success);
        // Two intervals at half a token each, 300ms of the first already spent.
        assert_eq!(denied.reset_ms, 1700);
        assert_eq!(denied.retry_after, Some(2));

        clock.advance(denied.reset_ms as i64);
        assert!(limiter.try_acquire("f", 1, 0.5, 1000).success);
    }

    #[test]
    fn test_reset_until_full() {
        let (_clock, limiter) = limiter();

        let result = limiter.try_acquire("r", 10, 1.0, 1000);
        assert_eq!(result.remaining, 9);
        assert_eq!(result.reset_ms, 1000);

        for _ in 0..4 {
            limiter.try_acquire("r", 10, 1.0, 1000);
        }
        let result = limiter.try_acquire("r", 10, 2.0, 1000);
        // 4 tokens left, 6 missing, 3 intervals at 2 per interval
        assert_eq!(result.remaining, 4);
        assert_eq!(result.reset_ms, 3000);
    }

    #[test]
    fn test_zero_capacity_always_denies() {
        let (clock, limiter) = limiter();

        for _ in 0..3 {
            let result = limiter.try_acquire("z", 0, 1.0, 1000);
            assert!(!result.success);
            assert_eq!(result.remaining, 0);
            clock.advance(10_000);
        }
    }

    #[test]
    fn test_disabled_refill_never_divides() {
        let (clock, limiter) = limiter();

        assert!(limiter.try_acquire("d", 1, 1.0, 0).success);
        clock.advance(60_000);
        let result = limiter.try_acquire("d", 1, 1.0, 0);
        assert!(!result.success);
        assert_eq!(result.reset_ms, 0);

        assert!(limiter.try_acquire("n", 1, f64::NAN, 1000).success);
        clock.advance(60_000);
        assert!(!limiter.try_acquire("n", 1, f64::NAN, 1000).success);
    }

    #[test]
    fn test_large_capacity() {
        let (clock, limiter) = limiter();

        let result = limiter.try_acquire("big", u64::MAX, f64::MAX, 1);
        assert!(result.success);

        clock.advance(i64::MAX / 2);
        let result = limiter.try_acquire("big", u64::MAX, f64::MAX, 1);
        assert!(result.success);
        assert!(limiter.tokens("big").unwrap() <= u64::MAX as f64);
    }

    #[test]
    fn test_independent_identifiers() {
        let (_clock, limiter) = limiter();

        assert!(limiter.try_acquire("a", 2, 1.0, 1000).success);
        assert!(limiter.try_acquire("a", 2, 1.0, 1000).success);
        assert!(!limiter.try_acquire("a", 2, 1.0, 1000).success);

        let b = limiter.try_acquire("b", 2, 1.0, 1000);
        assert!(b.success);
        assert_eq!(b.remaining, 1);
    }

    #[test]
    fn test_clock_regression_is_clamped() {
        let (clock, limiter) = limiter();

        assert!(limiter.try_acquire("c", 1, 1.0, 1000).success);
        clock.rewind(5_000);

        let result = limiter.try_acquire("c", 1, 1.0, 1000);
        assert!(!result.success);
        assert!(result.reset_ms <= 1000);
        assert_eq!(limiter.tokens("c"), Some(0.0));
    }

    #[test]
    fn test_restore_is_capped() {
        let (_clock, limiter) = limiter();

        limiter.try_acquire("s", 3, 1.0, 1000);
        assert_eq!(limiter.tokens("s"), Some(2.0));

        limiter.restore("s", 3);
        assert_eq!(limiter.tokens("s"), Some(3.0));

        limiter.restore("s", 3);
        assert_eq!(limiter.tokens("s"), Some(3.0));

        // No bucket, nothing created.
        limiter.restore("ghost", 3);
        assert_eq!(limiter.tokens("ghost"), None);
    }

    #[test]
    fn test_cleanup_evicts_stale_buckets() {
        let (clock, limiter) = limiter();

        limiter.try_acquire("stale", 3, 1.0, 1000);
        clock.advance(10_000);
        limiter.try_acquire("fresh", 3, 1.0, 1000);

        assert_eq!(limiter.cleanup(5_000), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.tokens("stale"), None);

        // Comes back as a brand new, full bucket.
        let result = limiter.try_acquire("stale", 3, 1.0, 1000);
        assert_eq!(result.remaining, 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_bucket() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(TokenBucketLimiter::new(clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.try_acquire("hot", 100, 1.0, 1000).success)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
