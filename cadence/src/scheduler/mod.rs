//! Per-key cooldown scheduling
//!
//! Each key cycles through a delay, a FIFO wait for one of the limited
//! slots, and an attempt. Successes put the key on cooldown; failures retry
//! after a fixed delay. Slots are released on every exit path.

mod config;
mod cooldown;
mod core;
mod dispatcher;
mod handle;
mod limiter;
mod queue;
mod snapshot;

pub use config::{FailurePolicy, SchedulerConfig};
pub use cooldown::CooldownRegistry;
pub use core::{Scheduler, stagger_plan};
pub use dispatcher::{Admission, Dispatcher};
pub use handle::SchedulerHandle;
pub use limiter::{Capacity, ResourceLimiter, Slot};
pub use queue::{DelayQueue, QueueItem, WorkQueue};
pub use snapshot::{KeySnapshot, KeyState, SchedulerSnapshot, SchedulerStats};
