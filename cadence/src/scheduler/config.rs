//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::limiter::Capacity;

/// Longest delay or timeout a setting may ask for
pub const MAX_SETTING_SECS: u64 = 365 * 24 * 60 * 60;

/// What a failed attempt does to the key's cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Leave the cooldown untouched
    #[default]
    Preserve,
    /// Put the key on a cooldown as long as the retry delay
    RetryWindow,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preserve => write!(f, "preserve"),
            Self::RetryWindow => write!(f, "retry-window"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preserve" => Ok(Self::Preserve),
            "retry-window" => Ok(Self::RetryWindow),
            _ => Err(format!("Unknown failure policy: {}. Use: preserve or retry-window", s)),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max attempts in flight at once
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: Capacity,

    /// Cooldown after a successful attempt, in seconds
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Floor on the delay before a key's next attempt, in seconds
    #[serde(rename = "min-delay-secs", default = "default_min_delay_secs")]
    pub min_delay_secs: u64,

    /// Upper bound of the random delay added after a success, in seconds
    #[serde(rename = "jitter-max-secs", default = "default_jitter_max_secs")]
    pub jitter_max_secs: u64,

    /// Delay before retrying a failed attempt, in seconds
    #[serde(rename = "retry-delay-secs", default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Offset between consecutive keys' first attempts, in seconds
    #[serde(rename = "stagger-secs", default = "default_stagger_secs")]
    pub stagger_secs: u64,

    #[serde(rename = "failure-policy", default)]
    pub failure_policy: FailurePolicy,

    /// Deadline handed to the executor, in seconds
    #[serde(rename = "attempt-timeout-secs", default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Extra time past the deadline before the attempt is aborted, in seconds
    #[serde(rename = "attempt-grace-secs", default = "default_attempt_grace_secs")]
    pub attempt_grace_secs: u64,

    /// How long shutdown waits for in-flight attempts, in seconds
    #[serde(rename = "shutdown-timeout-secs", default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_concurrent() -> Capacity {
    Capacity::bounded(3).unwrap_or(Capacity::Unbounded)
}

fn default_cooldown_secs() -> u64 {
    14 * 60
}

fn default_min_delay_secs() -> u64 {
    10
}

fn default_jitter_max_secs() -> u64 {
    60
}

fn default_retry_delay_secs() -> u64 {
    5 * 60
}

fn default_stagger_secs() -> u64 {
    10
}

fn default_attempt_timeout_secs() -> u64 {
    300
}

fn default_attempt_grace_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cooldown_secs: default_cooldown_secs(),
            min_delay_secs: default_min_delay_secs(),
            jitter_max_secs: default_jitter_max_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            stagger_secs: default_stagger_secs(),
            failure_policy: FailurePolicy::Preserve,
            attempt_timeout_secs: default_attempt_timeout_secs(),
            attempt_grace_secs: default_attempt_grace_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Check settings that would make the scheduler spin or never finish an attempt
    pub fn validate(&self) -> Result<(), String> {
        if self.retry_delay_secs == 0 {
            return Err("retry-delay-secs must be positive".to_string());
        }
        if self.attempt_timeout_secs == 0 {
            return Err("attempt-timeout-secs must be positive".to_string());
        }
        if self.cooldown_secs == 0 && self.min_delay_secs == 0 {
            return Err("cooldown-secs and min-delay-secs cannot both be zero".to_string());
        }

        let bounded = [
            ("cooldown-secs", self.cooldown_secs),
            ("min-delay-secs", self.min_delay_secs),
            ("jitter-max-secs", self.jitter_max_secs),
            ("retry-delay-secs", self.retry_delay_secs),
            ("stagger-secs", self.stagger_secs),
            ("attempt-timeout-secs", self.attempt_timeout_secs),
            ("attempt-grace-secs", self.attempt_grace_secs),
            ("shutdown-timeout-secs", self.shutdown_timeout_secs),
        ];
        if let Some((name, value)) = bounded.iter().find(|(_, value)| *value > MAX_SETTING_SECS) {
            return Err(format!("{} is {}, the maximum is {} (one year)", name, value, MAX_SETTING_SECS));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_secs)
    }

    pub fn jitter_max(&self) -> Duration {
        Duration::from_secs(self.jitter_max_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_secs(self.stagger_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Hard limit on one attempt, past which it is aborted
    pub fn attempt_backstop(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs.saturating_add(self.attempt_grace_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent, Capacity::bounded(3).unwrap());
        assert_eq!(config.cooldown(), Duration::from_secs(840));
        assert_eq!(config.retry_delay(), Duration::from_secs(300));
        assert_eq!(config.stagger(), Duration::from_secs(10));
        assert_eq!(config.failure_policy, FailurePolicy::Preserve);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_attempt_backstop_duration() {
        let config = SchedulerConfig {
            attempt_timeout_secs: 120,
            attempt_grace_secs: 15,
            ..Default::default()
        };
        assert_eq!(config.attempt_backstop(), Duration::from_secs(135));
    }

    #[test]
    fn test_deserialize_partial() {
        let yaml = r#"
max-concurrent: unbounded
cooldown-secs: 60
failure-policy: retry-window
"#;
        let config: SchedulerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_concurrent, Capacity::Unbounded);
        assert_eq!(config.cooldown_secs, 60);
        assert_eq!(config.failure_policy, FailurePolicy::RetryWindow);
        assert_eq!(config.min_delay_secs, 10);
    }

    #[test]
    fn test_validate_rejects_zero_retry_delay() {
        let config = SchedulerConfig {
            retry_delay_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_durations() {
        for config in [
            SchedulerConfig {
                cooldown_secs: u64::MAX,
                ..Default::default()
            },
            SchedulerConfig {
                stagger_secs: MAX_SETTING_SECS + 1,
                ..Default::default()
            },
            SchedulerConfig {
                attempt_grace_secs: u64::MAX,
                ..Default::default()
            },
        ] {
            let err = config.validate().unwrap_err();
            assert!(err.contains("the maximum is"), "{}", err);
        }

        let at_limit = SchedulerConfig {
            retry_delay_secs: MAX_SETTING_SECS,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_attempt_backstop_saturates() {
        let config = SchedulerConfig {
            attempt_timeout_secs: u64::MAX,
            attempt_grace_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.attempt_backstop(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("preserve".parse::<FailurePolicy>().unwrap(), FailurePolicy::Preserve);
        assert_eq!("Retry-Window".parse::<FailurePolicy>().unwrap(), FailurePolicy::RetryWindow);
        assert!("reset".parse::<FailurePolicy>().is_err());
    }
}
