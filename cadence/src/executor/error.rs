//! Executor error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a job attempt
///
/// Every variant is an execution failure: the dispatcher folds it into a
/// failed outcome and retries the key later.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to spawn job process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid job report: {0}")]
    InvalidReport(String),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Job aborted")]
    Aborted,
}
