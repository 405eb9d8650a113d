//! Line-oriented decision service.
//!
//! Each input line is a JSON request naming a policy and carrying the
//! request headers; each output line is the JSON decision for it:
//!
//! ```text
//! > {"policy": "auth", "headers": {"x-forwarded-for": "203.0.113.9"}}
//! < {"identifier":"ip_203.0.113.9_4pl4mu","policy":"auth","success":true,"limit":10,"remaining":9,"reset":60000}
//! ```
//!
//! Malformed lines get an `{"error": "..."}` reply and processing continues.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::ratelimit::{Decision, RateLimiter, RequestHeaders, DEFAULT_POLICY};

/// One request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Policy to check against, the default one when absent
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Request headers used to identify the client
    #[serde(default)]
    pub headers: RequestHeaders,
}

fn default_policy() -> String {
    DEFAULT_POLICY.to_string()
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CheckResponse {
    /// The limiter's decision
    Decision(Decision),
    /// The line could not be processed
    Error {
        /// What went wrong
        error: String,
    },
}

/// Counters for one sidecar session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SidecarStats {
    /// Requests admitted
    pub admitted: u64,
    /// Requests denied
    pub denied: u64,
    /// Lines that could not be parsed
    pub errors: u64,
}

/// Decide a single request line.
pub fn handle_line(limiter: &RateLimiter, line: &str) -> CheckResponse {
    match serde_json::from_str::<CheckRequest>(line) {
        Ok(request) => CheckResponse::Decision(limiter.check(&request.policy, &request.headers)),
        Err(e) => {
            warn!(error = %e, "Rejecting malformed request line");
            CheckResponse::Error {
                error: format!("invalid request: {}", e),
            }
        }
    }
}

/// Serve requests from `reader` until end of input, writing one decision per
/// line to `writer`.
#[instrument(skip_all)]
pub async fn run<R, W>(limiter: &RateLimiter, reader: R, mut writer: W) -> Result<SidecarStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = SidecarStats::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_line(limiter, line);
        match &response {
            CheckResponse::Decision(decision) if decision.result.success => stats.admitted += 1,
            CheckResponse::Decision(_) => stats.denied += 1,
            CheckResponse::Error { .. } => stats.errors += 1,
        }

        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;

        debug!(response = ?response, "Decision written");
    }

    info!(
        admitted = stats.admitted,
        denied = stats.denied,
        errors = stats.errors,
        "Input closed"
    );

    Ok(stats)
}
