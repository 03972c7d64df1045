use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::HeaderMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ratelimit::{RateLimitConfig, RateLimitHeaders, RatelimitGroup, RatelimitHandlerCtx};

/// Default grace period added to "now" when collecting expired cooldowns
pub const RATELIMIT_DROP_ROUND: Duration = Duration::from_millis(200);

/// Identity of a handler: the group it belongs to and the concrete scope id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    /// [`RatelimitGroup::group_id`]
    pub group_id: u64,
    /// Channel, guild or webhook id; `0` for global and unlimited scopes
    pub limiter_id: u64,
}

/// Point-in-time view of a handler's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSnapshot {
    /// Budget of the handler's group
    pub size: usize,
    /// Requests currently between `enter` and `exit`
    pub active: usize,
    /// Cooldowns that did not expire yet
    pub drops: usize,
    /// Callers waiting for admission
    pub queued: usize,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    admission: oneshot::Sender<()>,
}

#[derive(Debug)]
struct Wakeupper {
    deadline: Instant,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct HandlerState {
    active: usize,
    /// Sorted descending, so the earliest cooldown is the last element
    drops: Vec<Instant>,
    queue: VecDeque<Waiter>,
    wakeupper: Option<Wakeupper>,
    next_waiter: u64,
}

impl HandlerState {
    fn has_room(&self, size: usize) -> bool {
        self.active + self.drops.len() < size
    }

    fn push_drop(&mut self, drop: Instant) {
        let index = self.drops.partition_point(|pending| *pending > drop);
        self.drops.insert(index, drop);
    }

    fn pop_expired(&mut self, now: Instant) {
        while self.drops.last().is_some_and(|drop| *drop <= now) {
            self.drops.pop();
        }
    }

    fn cancel_wakeupper(&mut self) {
        if let Some(wakeupper) = self.wakeupper.take() {
            wakeupper.task.abort();
        }
    }

    /// Admit up to `count` waiters in arrival order, returning how many got in
    fn admit(&mut self, count: usize) -> usize {
        let mut admitted = 0;
        while admitted < count {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            if waiter.admission.send(()).is_ok() {
                self.active += 1;
                admitted += 1;
            }
        }
        admitted
    }
}

struct HandlerShared {
    group: RatelimitGroup,
    limiter_id: u64,
    drop_round: Duration,
    state: Mutex<HandlerState>,
}

/// Admission gate for one rate limit scope.
///
/// At most `group.size()` callers are let through [`enter`](Self::enter) at
/// the same time. Every [`exit`](Self::exit) carrying Discord's rate limit
/// headers keeps its slot blocked until the window it was counted in resets
/// (a "drop"). Callers that find no free slot wait in strict arrival order.
///
/// Handlers are cheap to clone; clones share their state. Two handlers are
/// equal if they gate the same scope of the same group.
#[derive(Clone)]
pub struct RatelimitHandler {
    shared: Arc<HandlerShared>,
}

impl RatelimitHandler {
    /// Create a handler for the scope `limiter_id` of `group`
    #[must_use]
    pub fn new(group: &RatelimitGroup, limiter_id: u64) -> Self {
        Self::with_config(group, limiter_id, &RateLimitConfig::default())
    }

    pub(crate) fn with_config(
        group: &RatelimitGroup,
        limiter_id: u64,
        config: &RateLimitConfig,
    ) -> Self {
        Self {
            shared: Arc::new(HandlerShared {
                group: group.clone(),
                limiter_id,
                drop_round: config.drop_round,
                state: Mutex::new(HandlerState::default()),
            }),
        }
    }

    /// A handler that admits everything immediately
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(&RatelimitGroup::unlimited(), 0)
    }

    /// The group this handler belongs to
    #[must_use]
    pub fn group(&self) -> &RatelimitGroup {
        &self.shared.group
    }

    /// The concrete scope id
    #[must_use]
    pub fn limiter_id(&self) -> u64 {
        self.shared.limiter_id
    }

    /// Lookup key of this handler
    #[must_use]
    pub fn key(&self) -> HandlerKey {
        HandlerKey {
            group_id: self.shared.group.group_id(),
            limiter_id: self.shared.limiter_id,
        }
    }

    /// Whether admission control is disabled for this handler
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.shared.group.is_unlimited()
    }

    fn state(&self) -> MutexGuard<'_, HandlerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a slot is free and take it.
    ///
    /// Every completed `enter` must be paired with one [`exit`](Self::exit);
    /// prefer [`ctx`](Self::ctx), which guarantees that.
    ///
    /// Dropping the returned future while it waits gives up the place in the
    /// queue. If it was admitted in the meantime, the slot is released again.
    pub async fn enter(&self) {
        if self.is_unlimited() {
            return;
        }

        let waiting = {
            let mut state = self.state();
            let size = self.shared.group.size();
            if state.queue.is_empty() && state.has_room(size) {
                state.active += 1;
                return;
            }

            let id = state.next_waiter;
            state.next_waiter += 1;
            let (admission, admitted) = oneshot::channel();
            state.queue.push_back(Waiter { id, admission });
            log::trace!(
                "{self:?} saturated ({} active, {} cooling, size {size}), {} waiting",
                state.active,
                state.drops.len(),
                state.queue.len()
            );

            Waiting {
                handler: self,
                id,
                admitted,
                settled: false,
            }
        };

        waiting.admitted().await;
    }

    /// Enter the handler and return a guard that exits on drop
    pub async fn ctx(&self) -> RatelimitHandlerCtx {
        self.enter().await;
        RatelimitHandlerCtx::new(self.clone())
    }

    /// Release the slot taken by [`enter`](Self::enter).
    ///
    /// With `headers` carrying `X-RateLimit-Limit` and reset information, the
    /// budget of the group is raised if Discord reports more than is known,
    /// and the slot stays blocked until the reported reset. Without them the
    /// slot is freed right away.
    ///
    /// Cooldown timers are spawned on the current Tokio runtime.
    pub fn exit(&self, headers: Option<&HeaderMap>) {
        if self.is_unlimited() {
            return;
        }

        let headers = headers.map(RateLimitHeaders::parse).unwrap_or_default();
        let mut state = self.state();
        state.active = state.active.saturating_sub(1);

        if let Some(limit) = headers.limit {
            let previous = self.shared.group.grow(limit);
            if limit > previous {
                let admitted = state.admit(limit - previous);
                log::debug!(
                    "{self:?} budget raised from {previous} to {limit}, admitted {admitted} waiting request(s)"
                );
            }

            if let Some(cooldown) = headers.cooldown() {
                if let Some(drop) = Instant::now().checked_add(cooldown) {
                    state.push_drop(drop);
                    self.arm(&mut state, drop);
                    return;
                }
                log::warn!("{self:?} ignoring unrepresentable cooldown of {cooldown:?}");
            }
        }

        state.cancel_wakeupper();
        self.wakeup_locked(&mut state);
    }

    /// Collect expired cooldowns and admit as many waiters as the budget allows
    pub fn wakeup(&self) {
        let mut state = self.state();
        self.wakeup_locked(&mut state);
    }

    fn fire(&self, deadline: Instant) {
        let mut state = self.state();
        if state
            .wakeupper
            .as_ref()
            .is_some_and(|wakeupper| wakeupper.deadline == deadline)
        {
            state.wakeupper = None;
        }
        self.wakeup_locked(&mut state);
    }

    fn wakeup_locked(&self, state: &mut HandlerState) {
        let now = Instant::now() + self.shared.drop_round;
        state.pop_expired(now);
        if let Some(&next) = state.drops.last() {
            self.arm(state, next);
        }

        if state.queue.is_empty() {
            return;
        }

        let size = self.shared.group.size();
        let free = size.saturating_sub(state.active + state.drops.len());
        let admitted = state.admit(free);
        if admitted > 0 {
            log::trace!("{self:?} admitted {admitted} waiting request(s)");
        }
    }

    /// Make sure a wakeup happens at `deadline` or earlier
    fn arm(&self, state: &mut HandlerState, deadline: Instant) {
        if state
            .wakeupper
            .as_ref()
            .is_some_and(|wakeupper| wakeupper.deadline <= deadline)
        {
            return;
        }
        state.cancel_wakeupper();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("{self:?} cannot schedule a wakeup outside of a Tokio runtime");
            return;
        };

        let shared = Arc::downgrade(&self.shared);
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                RatelimitHandler { shared }.fire(deadline);
            }
        });
        state.wakeupper = Some(Wakeupper { deadline, task });
    }

    /// Current bookkeeping of the handler
    #[must_use]
    pub fn snapshot(&self) -> HandlerSnapshot {
        let state = self.state();
        HandlerSnapshot {
            size: self.shared.group.size(),
            active: state.active,
            drops: state.drops.len(),
            queued: state.queue.len(),
        }
    }

    /// Nothing in flight, cooling down or waiting
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.active == 0 && state.drops.is_empty() && state.queue.is_empty()
    }

    /// Idle and referenced by nobody but the owner of this value
    pub(crate) fn is_collectable(&self) -> bool {
        Arc::strong_count(&self.shared) == 1 && self.is_idle()
    }
}

impl PartialEq for RatelimitHandler {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RatelimitHandler {}

impl Hash for RatelimitHandler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for RatelimitHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatelimitHandler")
            .field("group_id", &self.shared.group.group_id())
            .field("limiter", &self.shared.group.limiter())
            .field("limiter_id", &self.shared.limiter_id)
            .finish()
    }
}

/// A place in a handler's queue.
///
/// Dropping it before admission was observed removes the entry from the
/// queue, or releases the slot if admission already happened.
struct Waiting<'a> {
    handler: &'a RatelimitHandler,
    id: u64,
    admitted: oneshot::Receiver<()>,
    settled: bool,
}

impl Waiting<'_> {
    async fn admitted(mut self) {
        if (&mut self.admitted).await.is_err() {
            log::warn!("{:?} dropped a waiter without admitting it", self.handler);
        }
        self.settled = true;
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.handler.state();
        if let Some(index) = state.queue.iter().position(|waiter| waiter.id == self.id) {
            state.queue.remove(index);
            return;
        }
        drop(state);

        self.handler.exit(None);
    }
}
