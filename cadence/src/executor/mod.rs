//! Job executors
//!
//! A job executor performs one attempt for one key. The scheduler only knows
//! how many attempts are in flight; whatever heavyweight resource an attempt
//! needs is acquired and torn down inside the executor.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Key;

mod command;
mod error;

pub use command::CommandExecutor;
pub use error::ExecutorError;

/// Performs a single job attempt
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one attempt for `key`
    ///
    /// Implementations must give up once `deadline` has elapsed.
    async fn execute(&self, key: &Key, context: &str, deadline: Duration) -> Result<JobReport, ExecutorError>;
}

/// Structured result reported by an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobReport {
    /// Create a successful report
    pub fn success(metric: Option<f64>) -> Self {
        debug!(?metric, "JobReport::success: called");
        Self {
            success: true,
            metric,
            reason: None,
        }
    }

    /// Create a failed report
    pub fn failure(reason: impl Into<String>) -> Self {
        debug!("JobReport::failure: called");
        Self {
            success: false,
            metric: None,
            reason: Some(reason.into()),
        }
    }
}
