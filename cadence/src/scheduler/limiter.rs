//! Resource limiter bounding concurrent job attempts

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

/// Maximum number of attempts allowed in flight at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CapacityRepr", into = "CapacityRepr")]
pub enum Capacity {
    Bounded(NonZeroUsize),
    Unbounded,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CapacityRepr {
    Limit(usize),
    Named(String),
}

impl Capacity {
    /// Bounded capacity; `None` for zero
    pub fn bounded(limit: usize) -> Option<Self> {
        NonZeroUsize::new(limit).map(Self::Bounded)
    }

    /// Numeric limit, if any
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Bounded(n) => Some(n.get()),
            Self::Unbounded => None,
        }
    }

    /// Whether one more slot fits on top of `outstanding`
    pub fn admits(&self, outstanding: usize) -> bool {
        match self {
            Self::Bounded(n) => outstanding < n.get(),
            Self::Unbounded => true,
        }
    }
}

impl TryFrom<CapacityRepr> for Capacity {
    type Error = String;

    fn try_from(repr: CapacityRepr) -> Result<Self, Self::Error> {
        match repr {
            CapacityRepr::Limit(n) => Capacity::bounded(n).ok_or_else(|| "capacity must be positive".to_string()),
            CapacityRepr::Named(s) => s.parse(),
        }
    }
}

impl From<Capacity> for CapacityRepr {
    fn from(capacity: Capacity) -> Self {
        match capacity {
            Capacity::Bounded(n) => CapacityRepr::Limit(n.get()),
            Capacity::Unbounded => CapacityRepr::Named("unbounded".to_string()),
        }
    }
}

impl FromStr for Capacity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Self::Unbounded);
        }
        match s.parse::<usize>() {
            Ok(n) => Capacity::bounded(n).ok_or_else(|| "capacity must be positive".to_string()),
            Err(_) => Err(format!("Unknown capacity: {}. Use a positive number or 'unbounded'", s)),
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "{}", n),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

struct LimiterInner {
    capacity: Capacity,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    released: Notify,
}

/// Counts execution slots against a fixed capacity
///
/// Cloning yields another handle to the same counter.
#[derive(Clone)]
pub struct ResourceLimiter {
    inner: Arc<LimiterInner>,
}

impl ResourceLimiter {
    pub fn new(capacity: Capacity) -> Self {
        debug!(%capacity, "ResourceLimiter::new: called");
        Self {
            inner: Arc::new(LimiterInner {
                capacity,
                outstanding: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                released: Notify::new(),
            }),
        }
    }

    /// Take a slot if one is free; never blocks
    pub fn try_acquire(&self) -> Option<Slot> {
        let capacity = self.inner.capacity;
        let acquired = self
            .inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| capacity.admits(n).then_some(n + 1));

        match acquired {
            Ok(previous) => {
                self.inner.peak.fetch_max(previous + 1, Ordering::AcqRel);
                debug!(outstanding = previous + 1, "ResourceLimiter::try_acquire: acquired");
                Some(Slot {
                    inner: Arc::clone(&self.inner),
                })
            }
            Err(outstanding) => {
                debug!(outstanding, "ResourceLimiter::try_acquire: at capacity");
                None
            }
        }
    }

    /// Wait until some slot is released
    ///
    /// A release that happens while nobody is waiting is remembered, so the
    /// next call returns immediately.
    pub async fn released(&self) {
        self.inner.released.notified().await;
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> Capacity {
        self.inner.capacity
    }

    /// Highest number of slots ever held at once
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResourceLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLimiter")
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Permission to run one attempt
///
/// Dropping the slot releases it, so every exit path of an attempt gives the
/// slot back.
#[must_use = "dropping a slot releases it immediately"]
pub struct Slot {
    inner: Arc<LimiterInner>,
}

impl Slot {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let previous = self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "slot released with no outstanding slots");
        debug!(outstanding = previous.saturating_sub(1), "Slot::drop: released");
        self.inner.released.notify_one();
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").finish_non_exhaustive()
    }
}
