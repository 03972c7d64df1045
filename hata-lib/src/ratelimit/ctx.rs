use http::HeaderMap;

use crate::ratelimit::RatelimitHandler;

/// An admitted request of a [`RatelimitHandler`].
///
/// The slot is released exactly once: by [`exit`](Self::exit), or without
/// headers when the context is dropped. Use it to make sure a request that
/// is cancelled or fails halfway still hands its slot back.
#[derive(Debug)]
#[must_use = "dropping the context releases the slot immediately"]
pub struct RatelimitHandlerCtx {
    handler: RatelimitHandler,
    exited: bool,
}

impl RatelimitHandlerCtx {
    pub(crate) const fn new(handler: RatelimitHandler) -> Self {
        Self {
            handler,
            exited: false,
        }
    }

    /// The handler this context was admitted by
    #[must_use]
    pub const fn handler(&self) -> &RatelimitHandler {
        &self.handler
    }

    /// Release the slot, passing the response headers if there are any.
    ///
    /// Calls after the first one are ignored.
    pub fn exit(&mut self, headers: Option<&HeaderMap>) {
        if std::mem::replace(&mut self.exited, true) {
            return;
        }
        self.handler.exit(headers);
    }
}

impl Drop for RatelimitHandlerCtx {
    fn drop(&mut self) {
        self.exit(None);
    }
}

#[cfg(test)]
mod tests {
    use crate::ratelimit::{Limiter, RatelimitGroup, RatelimitHandler};

    #[tokio::test]
    async fn test_drop_releases_the_slot() {
        let handler = RatelimitHandler::new(&RatelimitGroup::new(Limiter::Webhook), 7);

        let ctx = handler.ctx().await;
        assert_eq!(ctx.handler(), &handler);
        assert_eq!(handler.snapshot().active, 1);

        drop(ctx);
        assert!(handler.is_idle());

        // The slot is free again, so this does not wait
        let _ctx = handler.ctx().await;
    }

    #[tokio::test]
    async fn test_unlimited_ctx() {
        let handler = RatelimitHandler::unlimited();
        let mut ctx = handler.ctx().await;
        ctx.exit(None);
        assert!(handler.is_idle());
    }
}
