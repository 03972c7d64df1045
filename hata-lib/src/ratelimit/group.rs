use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Distance between two consecutive group ids.
///
/// The gap leaves room for sub-codes derived from a group id.
pub const GROUP_ID_STRIDE: u64 = 21;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(GROUP_ID_STRIDE);

static UNLIMITED: LazyLock<RatelimitGroup> = LazyLock::new(|| {
    RatelimitGroup(Arc::new(GroupInner {
        group_id: 0,
        limiter: Limiter::Unlimited,
        size: AtomicUsize::new(0),
    }))
});

/// The scope a rate limit is enforced in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Limiter {
    /// One bucket shared by every request of the group
    Global,
    /// One bucket per channel id
    Channel,
    /// One bucket per guild id
    Guild,
    /// One bucket per webhook id
    Webhook,
    /// No rate limiting at all
    Unlimited,
}

impl Limiter {
    /// Whether buckets are split by a concrete id
    #[must_use]
    pub const fn is_scoped(self) -> bool {
        matches!(self, Self::Channel | Self::Guild | Self::Webhook)
    }
}

#[derive(Debug)]
struct GroupInner {
    group_id: u64,
    limiter: Limiter,
    size: AtomicUsize,
}

/// Descriptor of a family of endpoints sharing one rate limit.
///
/// A group is created once per endpoint family and shared by every
/// [`RatelimitHandler`](crate::RatelimitHandler) of that family. Its `size`
/// is the number of requests allowed to be in flight at the same time. It
/// starts at `1` and is raised in place whenever Discord reports a larger
/// limit.
///
/// Clones share the same identity and size.
#[derive(Clone)]
pub struct RatelimitGroup(Arc<GroupInner>);

impl RatelimitGroup {
    /// Create a new group limited by `limiter` with a budget of one request.
    ///
    /// [`Limiter::Unlimited`] returns the [`RatelimitGroup::unlimited`]
    /// singleton instead.
    #[must_use]
    pub fn new(limiter: Limiter) -> Self {
        if limiter == Limiter::Unlimited {
            return Self::unlimited();
        }

        let group_id = NEXT_GROUP_ID.fetch_add(GROUP_ID_STRIDE, Ordering::Relaxed);
        Self(Arc::new(GroupInner {
            group_id,
            limiter,
            size: AtomicUsize::new(1),
        }))
    }

    /// The group of endpoints which are not rate limited.
    ///
    /// Always returns the same group. Its size is `0`, which disables
    /// admission control for its handlers.
    #[must_use]
    pub fn unlimited() -> Self {
        UNLIMITED.clone()
    }

    /// Process-unique id of the group
    #[must_use]
    pub fn group_id(&self) -> u64 {
        self.0.group_id
    }

    /// Scope of the group's buckets
    #[must_use]
    pub fn limiter(&self) -> Limiter {
        self.0.limiter
    }

    /// Currently known concurrent request budget
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.size.load(Ordering::Acquire)
    }

    /// Whether this is the unlimited group
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.0.limiter == Limiter::Unlimited
    }

    /// Raise the budget to `size` if it is larger than the current one.
    ///
    /// Budgets never shrink. Returns the budget before the call. The
    /// unlimited group is never resized.
    pub fn grow(&self, size: usize) -> usize {
        if self.is_unlimited() {
            return 0;
        }
        self.0.size.fetch_max(size, Ordering::AcqRel)
    }

    /// Whether both values are the very same group object
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for RatelimitGroup {
    fn eq(&self, other: &Self) -> bool {
        self.0.group_id == other.0.group_id
    }
}

impl Eq for RatelimitGroup {}

impl Hash for RatelimitGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.group_id.hash(state);
    }
}

impl fmt::Debug for RatelimitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatelimitGroup")
            .field("group_id", &self.group_id())
            .field("limiter", &self.limiter())
            .field("size", &self.size())
            .finish()
    }
}
