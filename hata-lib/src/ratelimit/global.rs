use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Longest the global lock is held, whatever Discord asks for
pub const MAX_GLOBAL_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// A pending release of the global lock.
///
/// Clones observe the same release.
#[derive(Debug, Clone)]
pub struct GlobalRelease {
    released: watch::Receiver<bool>,
    deadline: Instant,
}

impl GlobalRelease {
    /// The moment the lock is lifted
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the lock has been lifted already
    #[must_use]
    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Wait until the lock is lifted
    pub async fn wait(mut self) {
        // A closed channel means the release task is gone, which only
        // happens once it sent the release or the runtime shuts down.
        let _ = self.released.wait_for(|released| *released).await;
    }
}

/// Gate closed by Discord's global rate limit.
///
/// While tripped, every request waits for the release before it tries to
/// enter its own [`RatelimitHandler`](crate::RatelimitHandler). Clones share
/// the same lock.
#[derive(Debug, Clone, Default)]
pub struct GlobalLock {
    pending: Arc<Mutex<Option<GlobalRelease>>>,
}

impl GlobalLock {
    /// Create an open lock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Option<GlobalRelease>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the lock for `retry_after`, at most [`MAX_GLOBAL_RETRY_AFTER`].
    ///
    /// If the lock is closed already, the pending release is returned as is,
    /// so concurrent trips wait for the same release. The release is
    /// scheduled on the current Tokio runtime and clears the lock when it
    /// fires. Outside of a runtime nothing can lift the lock, so it stays
    /// open and the returned release is already released.
    pub fn trip(&self, retry_after: Duration) -> GlobalRelease {
        let mut pending = self.pending();
        if let Some(release) = pending.as_ref() {
            return release.clone();
        }

        let retry_after = retry_after.min(MAX_GLOBAL_RETRY_AFTER);
        let deadline = Instant::now() + retry_after;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "Global rate limit hit outside of a Tokio runtime, not holding back requests"
            );
            let (_, released) = watch::channel(true);
            return GlobalRelease { released, deadline };
        };

        let (sender, released) = watch::channel(false);
        let release = GlobalRelease { released, deadline };
        *pending = Some(release.clone());
        drop(pending);

        log::warn!(
            "Global rate limit hit, holding back all requests for {}",
            humantime::format_duration(retry_after)
        );

        let slot = Arc::clone(&self.pending);
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            sender.send_replace(true);
            log::debug!("Global rate limit lifted");
        });

        release
    }

    /// The pending release, if the lock is closed
    #[must_use]
    pub fn current(&self) -> Option<GlobalRelease> {
        self.pending().clone()
    }

    /// Whether requests are currently held back
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.pending().is_some()
    }

    /// Wait for the pending release, if there is one
    pub async fn wait(&self) {
        if let Some(release) = self.current() {
            release.wait().await;
        }
    }
}
