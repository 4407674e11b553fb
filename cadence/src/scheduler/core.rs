//! Scheduler bootstrap: seeds every key and runs the dispatcher

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::AttemptKind;
use crate::executor::JobExecutor;
use crate::sources::Sources;

use super::config::SchedulerConfig;
use super::cooldown::deadline_after;
use super::dispatcher::{Admission, Dispatcher};
use super::handle::SchedulerHandle;
use super::limiter::ResourceLimiter;
use super::snapshot::SchedulerStats;

/// Offset of each key's first attempt from startup
///
/// Key `i` starts at `i * stagger`; a zero stagger starts every key at once.
pub fn stagger_plan(count: usize, stagger: Duration) -> Vec<Duration> {
    (0..count)
        .map(|index| stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX)))
        .collect()
}

/// The Scheduler runs every loaded key through its cooldown cycle,
/// never holding more than `max-concurrent` attempts in flight.
pub struct Scheduler {
    dispatcher: Dispatcher,
    stagger: Duration,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, sources: Arc<Sources>, executor: Arc<dyn JobExecutor>) -> Self {
        debug!(?config, "Scheduler::new: called");
        let stagger = config.stagger();
        Self {
            dispatcher: Dispatcher::new(config, sources, executor),
            stagger,
        }
    }

    /// Handle for snapshots and shutdown, usable from other tasks
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.dispatcher.sender())
    }

    /// Shared view of the slot counter, valid after `run` consumes the scheduler
    pub fn limiter(&self) -> ResourceLimiter {
        self.dispatcher.limiter().clone()
    }

    /// Seed every key and run until shutdown completes
    pub async fn run(mut self) -> SchedulerStats {
        debug!("Scheduler::run: called");
        self.seed();
        self.dispatcher.run().await
    }

    fn seed(&mut self) {
        let base = Instant::now();
        let plan = stagger_plan(self.dispatcher.key_count(), self.stagger);
        info!(keys = plan.len(), stagger_secs = self.stagger.as_secs(), "Seeding keys");

        for (index, offset) in plan.into_iter().enumerate() {
            match self.dispatcher.admit(index, AttemptKind::Initial, deadline_after(base, offset)) {
                Admission::Armed { .. } => {
                    info!(ordinal = index + 1, start_in_secs = offset.as_secs(), "Scheduled first attempt");
                }
                Admission::Rejected { reason } => {
                    warn!(ordinal = index + 1, %reason, "Could not seed key");
                }
            }
        }
    }
}
