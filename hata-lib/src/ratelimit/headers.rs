//! Handle Discord's rate limiting headers.
//!
//! Discord reports the state of a bucket with `X-RateLimit-*` headers on
//! every response. The reset moment is sent twice: once as an absolute Unix
//! timestamp and once relative to the server clock. The relative value
//! avoids clock skew, the absolute one is corrected with the `Date` header.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::{HeaderMap, HeaderValue};
use thiserror::Error;

/// Authoritative concurrent request budget of the scope
pub const LIMIT: &str = "x-ratelimit-limit";
/// Requests left in the current window
pub const REMAINING: &str = "x-ratelimit-remaining";
/// Absolute Unix timestamp (float seconds) of the window reset
pub const RESET: &str = "x-ratelimit-reset";
/// Seconds (float) until the window resets, measured by the server
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
/// Server clock at response time
pub const DATE: &str = "date";

#[derive(Debug, Error, PartialEq, Eq)]
/// Reasons a `Retry-After` header can be rejected
pub enum RetryAfterParseError {
    /// The value is neither delay seconds nor an HTTP date
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    /// The value is not visible ASCII
    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3)
///
/// # Errors
///
/// Returns an error if the value is neither a number of seconds nor an HTTP date
pub fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?;

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    value.parse::<u64>().map(Duration::from_secs).or_else(|_| {
        httpdate::parse_http_date(value)
            .map(|s| {
                s.duration_since(SystemTime::now())
                    // if date is in the past, we can use ZERO
                    .unwrap_or(Duration::ZERO)
            })
            .map_err(|_| RetryAfterParseError::ValueError(value.into()))
    })
}

/// The rate limit headers of a single response.
///
/// Parsing is permissive: a missing or malformed header simply leaves the
/// field empty.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Limit`
    pub limit: Option<usize>,
    /// `X-RateLimit-Remaining`
    pub remaining: Option<usize>,
    /// `X-RateLimit-Reset`, Unix seconds
    pub reset: Option<f64>,
    /// `X-RateLimit-Reset-After`, seconds
    pub reset_after: Option<f64>,
    /// `Date`
    pub date: Option<SystemTime>,
}

impl RateLimitHeaders {
    /// Extract the rate limit headers from a response
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            limit: parse_header_value(headers, LIMIT),
            remaining: parse_header_value(headers, REMAINING),
            reset: parse_header_value(headers, RESET),
            reset_after: parse_header_value(headers, RESET_AFTER),
            date: headers
                .get(DATE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| httpdate::parse_http_date(value).ok()),
        }
    }

    /// Whether the bucket has no budget left in the current window
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Time until the slot used by this response becomes available again.
    ///
    /// This is the smaller of `reset - date` and `reset_after`. Without a
    /// `Date` header the local clock stands in for the server clock. If only
    /// one of the two values is present it is used alone, and `None` is
    /// returned if neither is.
    #[must_use]
    pub fn cooldown(&self) -> Option<Duration> {
        let from_reset = self.reset.map(|reset| {
            let date = self.date.unwrap_or_else(SystemTime::now);
            let date = date
                .duration_since(UNIX_EPOCH)
                .map_or(0.0, |since_epoch| since_epoch.as_secs_f64());
            reset - date
        });

        let delay = match (from_reset, self.reset_after) {
            (Some(from_reset), Some(reset_after)) => from_reset.min(reset_after),
            (Some(delay), None) | (None, Some(delay)) => delay,
            (None, None) => return None,
        };

        Duration::try_from_secs_f64(delay.max(0.0)).ok()
    }
}

/// Helper method to parse numeric header values
fn parse_header_value<T: FromStr>(headers: &HeaderMap, header_name: &str) -> Option<T> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<T>().ok())
}
