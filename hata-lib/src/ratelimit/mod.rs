//! Per-scope rate limiting for the Discord REST API.
//!
//! Discord enforces its limits per endpoint family and per "major
//! parameter": requests to `POST /channels/1/messages` and
//! `POST /channels/2/messages` are limited separately, while every request
//! counts towards a cross-endpoint global limit as well.
//!
//! # Architecture
//!
//! - [`RatelimitGroup`]: static descriptor of an endpoint family and the scope
//!   ([`Limiter`]) it is limited by
//! - [`RatelimitHandler`]: admission gate for one concrete scope, e.g. one
//!   channel of one group
//! - [`RatelimitHandlerCtx`]: scoped acquisition that always releases its slot
//! - [`GlobalLock`]: gate tripped by Discord's global rate limit
//! - [`RateLimiter`]: owns the handler table and the global lock of a session
//! - [`RateLimitHeaders`]: the rate limit headers of a response
//!
//! Limits are discovered, not configured: a group starts with a budget of one
//! concurrent request and grows whenever `X-RateLimit-Limit` reports more.

mod config;
mod ctx;
mod global;
mod group;
mod handler;
mod headers;
mod limiter;

pub mod groups;

pub use config::RateLimitConfig;
pub use ctx::RatelimitHandlerCtx;
pub use global::{GlobalLock, GlobalRelease, MAX_GLOBAL_RETRY_AFTER};
pub use group::{GROUP_ID_STRIDE, Limiter, RatelimitGroup};
pub use handler::{HandlerKey, HandlerSnapshot, RATELIMIT_DROP_ROUND, RatelimitHandler};
pub use headers::{
    DATE, LIMIT, REMAINING, RESET, RESET_AFTER, RateLimitHeaders, RetryAfterParseError,
    parse_retry_after,
};
pub use limiter::RateLimiter;
