//! Rate limit response headers.
//!
//! Standard headers follow the IETF `RateLimit` header fields draft (version 6):
//! `RateLimit-Reset` is the number of seconds until the window resets. Legacy
//! headers use the older `X-RateLimit-*` convention, where the reset value is a
//! Unix timestamp in seconds.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::ratelimit::{RateLimitConfig, RateLimitStatus};

pub static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
pub static RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");

pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Rounds milliseconds up to whole seconds.
fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1_000)
}

/// Render the rate limit headers the policy asks for.
///
/// `Retry-After` is added to rejections whenever either header family is
/// enabled.
pub fn rate_limit_headers(config: &RateLimitConfig, status: &RateLimitStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let reset_after_secs = ceil_secs(status.reset_after.as_millis() as u64);

    if config.emit_standard_headers {
        headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(status.limit));
        headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(status.remaining));
        headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(reset_after_secs));

        let policy = format!(
            "{};w={}",
            status.limit,
            ceil_secs(config.window_duration_ms)
        );
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY.clone(), value);
        }
    }

    if config.emit_legacy_headers {
        headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(status.limit));
        headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(status.remaining));
        headers.insert(
            X_RATELIMIT_RESET.clone(),
            HeaderValue::from(ceil_secs(status.reset_at_ms)),
        );
    }

    if !status.is_ok() && (config.emit_standard_headers || config.emit_legacy_headers) {
        headers.insert(RETRY_AFTER, HeaderValue::from(reset_after_secs));
    }

    headers
}
