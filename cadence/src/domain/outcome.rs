//! Attempt kinds and outcomes

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinError;

use crate::executor::{ExecutorError, JobReport};

/// Why a key was admitted into the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttemptKind {
    /// First admission after startup
    #[default]
    Initial,
    /// Regular re-admission after a success or a cooldown skip
    Scheduled,
    /// Re-admission after a failed attempt
    Retry,
}

impl std::fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// What happened to one dispatched queue item
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { metric: Option<f64> },
    Failure { reason: String },
    /// The key was still cooling down; no slot was used
    Skipped { remaining: Duration },
}

impl Outcome {
    /// Fold an executor result into an outcome
    pub fn from_result(result: Result<JobReport, ExecutorError>) -> Self {
        match result {
            Ok(report) if report.success => Outcome::Success { metric: report.metric },
            Ok(report) => Outcome::Failure {
                reason: report.reason.unwrap_or_else(|| "Unknown error".to_string()),
            },
            Err(e) => Outcome::Failure { reason: e.to_string() },
        }
    }

    /// Fold the join result of an attempt task into an outcome
    pub fn from_join(result: Result<Result<JobReport, ExecutorError>, JoinError>) -> Self {
        match result {
            Ok(inner) => Self::from_result(inner),
            Err(e) if e.is_panic() => Self::from_result(Err(ExecutorError::Panicked(panic_message(e)))),
            Err(_) => Self::from_result(Err(ExecutorError::Aborted)),
        }
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
