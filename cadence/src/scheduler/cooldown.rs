//! Cooldown registry: when each key may run next

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::domain::Key;

/// Cap on any single delay added to an instant, about thirty years
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `at + delay`, with `delay` capped so the sum cannot overflow
pub(crate) fn deadline_after(at: Instant, delay: Duration) -> Instant {
    at + delay.min(FAR_FUTURE)
}

/// Maps each key to the instant it becomes eligible again
///
/// A key without an entry is eligible immediately. Entries only ever move
/// forward in time.
#[derive(Debug, Default)]
pub struct CooldownRegistry {
    entries: HashMap<Key, Instant>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eligible(&self, key: &Key, now: Instant) -> bool {
        self.entries.get(key).is_none_or(|eligible_at| now >= *eligible_at)
    }

    pub fn eligible_at(&self, key: &Key) -> Option<Instant> {
        self.entries.get(key).copied()
    }

    /// Time left before `key` is eligible, or `None` if it already is
    pub fn remaining(&self, key: &Key, now: Instant) -> Option<Duration> {
        self.entries
            .get(key)
            .filter(|eligible_at| now < **eligible_at)
            .map(|eligible_at| *eligible_at - now)
    }

    /// Record a completed attempt and return the new eligible instant
    pub fn record_attempt(&mut self, key: &Key, completed_at: Instant, cooldown: Duration) -> Instant {
        let candidate = deadline_after(completed_at, cooldown);
        let eligible_at = match self.entries.get(key) {
            Some(existing) if *existing > candidate => *existing,
            _ => candidate,
        };
        debug!(%key, ?cooldown, "CooldownRegistry::record_attempt: called");
        self.entries.insert(key.clone(), eligible_at);
        eligible_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
