use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::ratelimit::{GlobalLock, HandlerKey, RateLimitConfig, RatelimitGroup, RatelimitHandler};

/// Number of handler lookups between two sweeps of idle handlers
const SWEEP_INTERVAL: usize = 64;

/// Owns the rate limit state of one client session.
///
/// The `RateLimiter` keeps one [`RatelimitHandler`] per scope and the
/// session's [`GlobalLock`]. Share it by `Arc` with everything that sends
/// requests on behalf of the session.
///
/// # Architecture
///
/// - Handlers are created lazily on first lookup of their key
/// - Handlers that are idle and not referenced from outside the table are
///   dropped on a regular sweep, or explicitly with [`cleanup`](Self::cleanup)
/// - Thread-safe using `DashMap` for concurrent access to the handlers
#[derive(Debug, Default)]
pub struct RateLimiter {
    handlers: DashMap<HandlerKey, RatelimitHandler>,
    global: GlobalLock,
    config: RateLimitConfig,
    lookups: AtomicUsize,
}

impl RateLimiter {
    /// Create a `RateLimiter` with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `RateLimiter` with the given configuration
    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The handler of scope `limiter_id` in `group`, created if needed.
    ///
    /// Unlimited groups get a fresh handler that is not stored. Groups which
    /// are not split by id share one handler, whatever `limiter_id` is.
    ///
    /// # Examples
    ///
    /// ```
    /// use hata_lib::ratelimit::{Limiter, RateLimiter, RatelimitGroup};
    ///
    /// let limiter = RateLimiter::new();
    /// let group = RatelimitGroup::new(Limiter::Channel);
    ///
    /// assert_eq!(limiter.handler(&group, 1), limiter.handler(&group, 1));
    /// assert_ne!(limiter.handler(&group, 1), limiter.handler(&group, 2));
    /// ```
    #[must_use]
    pub fn handler(&self, group: &RatelimitGroup, limiter_id: u64) -> RatelimitHandler {
        if group.is_unlimited() {
            return RatelimitHandler::unlimited();
        }

        if self.lookups.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.cleanup();
        }

        let limiter_id = if group.limiter().is_scoped() {
            limiter_id
        } else {
            0
        };
        let key = HandlerKey {
            group_id: group.group_id(),
            limiter_id,
        };

        self.handlers
            .entry(key)
            .or_insert_with(|| RatelimitHandler::with_config(group, limiter_id, &self.config))
            .clone()
    }

    /// Drop every handler that is idle and referenced by nobody else.
    ///
    /// Returns the number of handlers removed.
    pub fn cleanup(&self) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|_, handler| !handler.is_collectable());
        let removed = before.saturating_sub(self.handlers.len());
        if removed > 0 {
            log::trace!("Dropped {removed} idle rate limit handler(s)");
        }
        removed
    }

    /// Number of handlers currently stored
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The session's global lock
    #[must_use]
    pub const fn global(&self) -> &GlobalLock {
        &self.global
    }

    /// The configuration handlers are created with
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
