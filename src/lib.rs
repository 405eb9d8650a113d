//! Tollgate - In-process Rate Limiting
//!
//! This crate implements the request rate limiter for a multi-tenant
//! storefront. Each client is identified from its request headers and
//! checked against a token bucket for bursts and an exact sliding window
//! for sustained volume. State lives in process memory and idle entries are
//! evicted by a background task.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod sidecar;
