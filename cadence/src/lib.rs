//! Cadence - per-key cooldown job scheduler
//!
//! Cadence runs a job once per key, over and over, for a fixed list of keys.
//! After a successful attempt a key sits out a cooldown window; a failed
//! attempt is retried after a fixed delay. A resource limiter caps how many
//! attempts run at once and ready keys wait their turn in FIFO order.
//!
//! # Modules
//!
//! - [`scheduler`] - cooldown registry, limiter, queues and the dispatcher
//! - [`executor`] - the job executor trait and the external-process executor
//! - [`sources`] - key and context file loading
//! - [`monitor`] - periodic status snapshots
//! - [`logview`] - tailing and following the log file
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod executor;
pub mod logview;
pub mod monitor;
pub mod scheduler;
pub mod sources;

pub use config::Config;
pub use domain::{AttemptKind, Key, Outcome};
pub use executor::{CommandExecutor, ExecutorError, JobExecutor, JobReport};
pub use scheduler::{
    Capacity, FailurePolicy, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerSnapshot, SchedulerStats,
};
pub use sources::{SourceError, Sources};
