//! Combined rate limiter.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::clock::Clock;
use super::identifier::{identify_request, HeaderLookup};
use super::result::RateLimitResult;
use super::rules::PolicySet;
use super::sliding_window::{SlidingWindow, SlidingWindowLimiter};
use super::store::{MemoryStore, StateStore};
use super::token_bucket::{TokenBucket, TokenBucketLimiter};
use crate::error::{Result, TollgateError};

/// Default bucket capacity.
pub const DEFAULT_MAX_TOKENS: u64 = 10;
/// Default tokens added per refill interval.
pub const DEFAULT_REFILL_RATE: f64 = 1.0;
/// Default refill interval in milliseconds.
pub const DEFAULT_REFILL_INTERVAL_MS: u64 = 1000;
/// Default requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Parameters for both algorithms of the combined limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Token bucket capacity (burst size)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Tokens added per elapsed refill interval
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,
    /// Length of one refill interval in milliseconds
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
    /// Requests allowed in any window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Sliding window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            refill_rate: DEFAULT_REFILL_RATE,
            refill_interval_ms: DEFAULT_REFILL_INTERVAL_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

fn default_max_tokens() -> u64 {
    DEFAULT_MAX_TOKENS
}

fn default_refill_rate() -> f64 {
    DEFAULT_REFILL_RATE
}

fn default_refill_interval_ms() -> u64 {
    DEFAULT_REFILL_INTERVAL_MS
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

impl LimitConfig {
    /// Reject parameter combinations that can never refill or never expire.
    ///
    /// Zero capacities are allowed; they deny everything.
    pub fn validate(&self) -> Result<()> {
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(TollgateError::Config(format!(
                "refill_rate must be a finite, positive number (got {})",
                self.refill_rate
            )));
        }
        if self.refill_interval_ms == 0 {
            return Err(TollgateError::Config(
                "refill_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 && self.max_requests > 0 {
            return Err(TollgateError::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Milliseconds for an empty bucket to refill completely.
    pub fn refill_time_ms(&self) -> u64 {
        if self.refill_interval_ms == 0 || self.refill_rate.is_nan() || self.refill_rate <= 0.0 {
            return u64::MAX;
        }
        let intervals = (self.max_tokens as f64 / self.refill_rate).ceil();
        // float-to-int casts saturate
        (intervals * self.refill_interval_ms as f64) as u64
    }
}

/// A decision for one request under a named policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The client identifier derived from the request
    pub identifier: String,
    /// The policy the request was checked against
    pub policy: String,
    /// The limiter's verdict
    #[serde(flatten)]
    pub result: RateLimitResult,
}

/// Entries removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Token buckets evicted
    pub buckets_removed: usize,
    /// Sliding windows evicted
    pub windows_removed: usize,
}

/// The combined rate limiter.
///
/// A request must pass the token bucket (burst protection) and then the
/// sliding window (sustained volume). The limiter is cheaply cloneable and
/// clones share state.
pub struct RateLimiter<Tb = MemoryStore<TokenBucket>, Sw = MemoryStore<SlidingWindow>> {
    inner: Arc<RateLimiterInner<Tb, Sw>>,
}

struct RateLimiterInner<Tb, Sw> {
    token_bucket: TokenBucketLimiter<Tb>,
    sliding_window: SlidingWindowLimiter<Sw>,
    policies: RwLock<PolicySet>,
}

impl<Tb, Sw> Clone for RateLimiter<Tb, Sw> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RateLimiter {
    /// Create a rate limiter with in-memory stores and default policies.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_policies(PolicySet::default(), clock)
    }

    /// Create a rate limiter with in-memory stores and the given policies.
    pub fn with_policies(policies: PolicySet, clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(
            TokenBucketLimiter::new(clock.clone()),
            SlidingWindowLimiter::new(clock),
            policies,
        )
    }
}

impl<Tb, Sw> RateLimiter<Tb, Sw>
where
    Tb: StateStore<TokenBucket>,
    Sw: StateStore<SlidingWindow>,
{
    /// Assemble a rate limiter from pre-built limiters.
    pub fn from_parts(
        token_bucket: TokenBucketLimiter<Tb>,
        sliding_window: SlidingWindowLimiter<Sw>,
        policies: PolicySet,
    ) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                token_bucket,
                sliding_window,
                policies: RwLock::new(policies),
            }),
        }
    }

    /// Check `identifier` against both algorithms.
    ///
    /// If the sliding window denies after the token bucket admitted, the
    /// consumed token is put back so the rejected request costs nothing.
    pub fn try_acquire(&self, identifier: &str, config: &LimitConfig) -> RateLimitResult {
        let token_bucket = &self.inner.token_bucket;
        let sliding_window = &self.inner.sliding_window;

        let burst = token_bucket.try_acquire(
            identifier,
            config.max_tokens,
            config.refill_rate,
            config.refill_interval_ms,
        );
        if !burst.success {
            return burst;
        }

        let sustained = sliding_window.try_acquire(identifier, config.max_requests, config.window_ms);
        if !sustained.success {
            token_bucket.restore(identifier, config.max_tokens);
            debug!(identifier, "Sliding window denied, token restored");
            return sustained;
        }

        let result = RateLimitResult::allowed(
            config.max_tokens.min(config.max_requests),
            burst.remaining.min(sustained.remaining),
            burst.reset_ms.max(sustained.reset_ms),
        );

        trace!(
            identifier,
            remaining = result.remaining,
            reset_ms = result.reset_ms,
            "Combined limit admitted"
        );

        result
    }

    /// Identify the request and check it against the named policy.
    ///
    /// State is kept per policy, so a client's `auth` budget is separate
    /// from its `api` budget. Unknown policy names all share the default
    /// policy's limits and state.
    pub fn check<H: HeaderLookup + ?Sized>(&self, policy: &str, request: &H) -> Decision {
        let identifier = identify_request(request);
        let (key, config) = {
            let policies = self.inner.policies.read();
            let (resolved, config) = policies.resolve(policy);
            (format!("{}:{}", resolved, identifier), config.clone())
        };

        let result = self.try_acquire(&key, &config);
        if !result.success {
            debug!(policy, identifier = %identifier, retry_after = ?result.retry_after, "Rate limit exceeded");
        }

        Decision {
            identifier,
            policy: policy.to_string(),
            result,
        }
    }

    /// Replace the policy set.
    pub fn set_policies(&self, policies: PolicySet) {
        *self.inner.policies.write() = policies;
    }

    /// A copy of the current policy set.
    pub fn policies(&self) -> PolicySet {
        self.inner.policies.read().clone()
    }

    /// The token bucket half of the limiter.
    pub fn token_bucket(&self) -> &TokenBucketLimiter<Tb> {
        &self.inner.token_bucket
    }

    /// The sliding window half of the limiter.
    pub fn sliding_window(&self) -> &SlidingWindowLimiter<Sw> {
        &self.inner.sliding_window
    }

    /// Evict state untouched for longer than `max_age_ms`.
    pub fn cleanup(&self, max_age_ms: u64) -> CleanupStats {
        let stats = CleanupStats {
            buckets_removed: self.inner.token_bucket.cleanup(max_age_ms),
            windows_removed: self.inner.sliding_window.cleanup(max_age_ms),
        };

        info!(
            buckets_removed = stats.buckets_removed,
            windows_removed = stats.windows_removed,
            buckets = self.inner.token_bucket.len(),
            windows = self.inner.sliding_window.len(),
            "Rate limiter cleanup complete"
        );

        stats
    }

    /// Drop all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.inner.token_bucket.clear();
        self.inner.sliding_window.clear();
    }

    /// Number of identifiers with a token bucket.
    pub fn bucket_count(&self) -> usize {
        self.inner.token_bucket.len()
    }

    /// Number of identifiers with a sliding window.
    pub fn window_count(&self) -> usize {
        self.inner.sliding_window.len()
    }
}
