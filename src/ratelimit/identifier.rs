//! Client identifier derivation.
//!
//! A request is keyed by its API key when it carries one. Otherwise it is
//! keyed by client IP plus a short hash of the user agent, so unrelated
//! clients behind the same NAT or proxy do not share one budget.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying a caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Proxy chain header; the first entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Client address as reported by a fronting proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Client software header.
pub const USER_AGENT_HEADER: &str = "user-agent";

/// Fallback for absent IP or user agent.
const UNKNOWN: &str = "unknown";

/// Case-insensitive header access on an incoming request.
pub trait HeaderLookup {
    /// The value of header `name`, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
}

/// A case-insensitive header map.
///
/// Deserializes from a JSON object of header names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, String>", into = "HashMap<String, String>")]
pub struct RequestHeaders {
    headers: HashMap<String, String>,
}

impl RequestHeaders {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value under any casing.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl From<HashMap<String, String>> for RequestHeaders {
    fn from(map: HashMap<String, String>) -> Self {
        let mut headers = RequestHeaders::new();
        for (name, value) in map {
            headers.insert(name, value);
        }
        headers
    }
}

impl From<RequestHeaders> for HashMap<String, String> {
    fn from(headers: RequestHeaders) -> Self {
        headers.headers
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = RequestHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl HeaderLookup for RequestHeaders {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.get(name) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Derive the rate limit identifier for a request.
///
/// Returns `api_<key>` when an API key is present, otherwise
/// `ip_<address>_<user agent hash>`. Never fails: missing headers become
/// `unknown`.
pub fn identify_request<H: HeaderLookup + ?Sized>(request: &H) -> String {
    if let Some(api_key) = request.header(API_KEY_HEADER).filter(|key| !key.is_empty()) {
        return format!("api_{}", api_key);
    }

    let ip = client_ip(request).unwrap_or(UNKNOWN);
    let user_agent = request.header(USER_AGENT_HEADER).unwrap_or(UNKNOWN);

    format!("ip_{}_{}", ip, hash_user_agent(user_agent))
}

/// The client address from `x-forwarded-for` or `x-real-ip`.
pub fn client_ip<H: HeaderLookup + ?Sized>(request: &H) -> Option<&str> {
    if let Some(forwarded) = request.header(FORWARDED_FOR_HEADER) {
        // First entry in the chain is the original client
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return Some(first);
        }
    }

    request
        .header(REAL_IP_HEADER)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// A fast, non-cryptographic string hash in base 36.
///
/// Folds each UTF-16 code unit into a wrapping 32-bit `hash * 31 + unit`
/// and renders the magnitude. Only used to spread clients across buckets.
pub fn hash_user_agent(user_agent: &str) -> String {
    let hash = user_agent.encode_utf16().fold(0i32, |hash, unit| {
        (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit))
    });

    to_base36(hash.unsigned_abs())
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    // digits are drawn from an ASCII table
    String::from_utf8_lossy(&digits).into_owned()
}
