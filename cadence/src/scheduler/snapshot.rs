//! Point-in-time view of the scheduler for monitoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::limiter::Capacity;

/// Where a key currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    /// Nothing queued; only seen between an outcome and its re-admission
    #[default]
    Idle,
    /// Waiting out a stagger, cooldown or retry delay
    Delayed,
    /// Ready, waiting for a free slot
    Queued,
    /// Holding a slot, executor running
    Running,
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Delayed => write!(f, "delayed"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Counters accumulated over the scheduler's lifetime
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_dispatched: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
    pub peak_concurrent: usize,
    pub peak_queue_depth: usize,
}

/// Per-key status line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySnapshot {
    /// 1-based position in the key list
    pub ordinal: usize,
    /// Redacted key
    pub key: String,
    pub state: KeyState,
    /// When the key leaves its cooldown, if it is on one
    pub eligible_at: Option<DateTime<Utc>>,
    /// When the key's pending item becomes ready, if it is delayed
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_metric: Option<f64>,
    pub consecutive_failures: u32,
}

/// Everything the monitor reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub capacity: Capacity,
    /// Slots currently held
    pub outstanding: usize,
    /// Items ready and waiting for a slot
    pub queue_depth: usize,
    /// Items waiting for their ready time
    pub delayed: usize,
    pub accepting: bool,
    pub stats: SchedulerStats,
    pub keys: Vec<KeySnapshot>,
}

impl SchedulerSnapshot {
    /// Number of keys in `state`
    pub fn count(&self, state: KeyState) -> usize {
        self.keys.iter().filter(|k| k.state == state).count()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "running {}/{}, queued {}, delayed {}, succeeded {}, failed {}, skipped {}",
            self.outstanding,
            self.capacity,
            self.queue_depth,
            self.delayed,
            self.stats.total_succeeded,
            self.stats.total_failed,
            self.stats.total_skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ordinal: usize, state: KeyState) -> KeySnapshot {
        KeySnapshot {
            ordinal,
            key: format!("key-{}", ordinal),
            state,
            eligible_at: None,
            next_attempt_at: None,
            last_metric: None,
            consecutive_failures: 0,
        }
    }

    fn snapshot() -> SchedulerSnapshot {
        SchedulerSnapshot {
            taken_at: Utc::now(),
            capacity: Capacity::bounded(2).unwrap(),
            outstanding: 2,
            queue_depth: 1,
            delayed: 1,
            accepting: true,
            stats: SchedulerStats {
                total_succeeded: 7,
                total_failed: 1,
                ..Default::default()
            },
            keys: vec![
                key(1, KeyState::Running),
                key(2, KeyState::Running),
                key(3, KeyState::Queued),
                key(4, KeyState::Delayed),
            ],
        }
    }

    #[test]
    fn test_count_by_state() {
        let snapshot = snapshot();
        assert_eq!(snapshot.count(KeyState::Running), 2);
        assert_eq!(snapshot.count(KeyState::Idle), 0);
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            snapshot().summary(),
            "running 2/2, queued 1, delayed 1, succeeded 7, failed 1, skipped 0"
        );
    }

    #[test]
    fn test_snapshot_json_roundtrip_keeps_states() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        assert!(json.contains("\"state\":\"running\""));
        let parsed: SchedulerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.count(KeyState::Queued), 1);
        assert_eq!(parsed.capacity, Capacity::bounded(2).unwrap());
    }
}
