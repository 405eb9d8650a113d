//! The outcome of a rate limit check.

use serde::{Deserialize, Serialize};

/// Header carrying the configured limit.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Header carrying the remaining quota.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Header carrying seconds until capacity is restored.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Header carrying seconds the client should wait before retrying.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Decision returned by every limiter.
///
/// A denial is an ordinary value, not an error. `retry_after` is only set
/// when `success` is `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request was admitted
    pub success: bool,
    /// The capacity the request was checked against
    pub limit: u64,
    /// Requests still available right now
    pub remaining: u64,
    /// Milliseconds until capacity is partially or fully restored
    #[serde(rename = "reset")]
    pub reset_ms: u64,
    /// Seconds to wait before retrying, on denial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// An admitted request.
    pub fn allowed(limit: u64, remaining: u64, reset_ms: u64) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            reset_ms,
            retry_after: None,
        }
    }

    /// A denied request. `retry_after` is derived from `reset_ms`.
    pub fn denied(limit: u64, reset_ms: u64) -> Self {
        Self {
            success: false,
            limit,
            remaining: 0,
            reset_ms,
            retry_after: Some(ms_to_secs_ceil(reset_ms)),
        }
    }

    /// Render the standard rate limit response headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, ms_to_secs_ceil(self.reset_ms).to_string()),
        ];

        if let Some(retry_after) = self.retry_after {
            headers.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }

        headers
    }
}

/// Whole seconds, rounded up.
pub(crate) fn ms_to_secs_ceil(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
