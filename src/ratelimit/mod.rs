//! Rate limiting algorithms and per-identifier state management.

mod cleanup;
mod clock;
mod identifier;
mod limiter;
mod result;
mod rules;
mod sliding_window;
mod store;
mod token_bucket;

pub use cleanup::{spawn_cleanup_task, CleanupHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identifier::{client_ip, hash_user_agent, identify_request, HeaderLookup, RequestHeaders};
pub use limiter::{CleanupStats, Decision, LimitConfig, RateLimiter};
pub use result::{
    RateLimitResult, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use rules::{PolicySet, DEFAULT_POLICY};
pub use sliding_window::{SlidingWindow, SlidingWindowLimiter};
pub use store::{MemoryStore, StateStore};
pub use token_bucket::{TokenBucket, TokenBucketLimiter};
