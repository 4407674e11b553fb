//! Dispatcher - the per-key scheduling state machine
//!
//! A single task owns the cooldown registry, the work queue, the delay queue
//! and every key's state. Attempts run in their own tasks and report back
//! through the dispatcher's channel, so all state changes happen in one place.
//!
//! Per key the cycle is `Delayed -> Queued -> Running -> Idle -> Delayed ...`.
//! A key is never admitted while it is anything but `Idle`, which keeps at
//! most one item or slot per key alive at any time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{AttemptKind, Outcome};
use crate::executor::{ExecutorError, JobExecutor, JobReport};
use crate::sources::Sources;

use super::config::{FailurePolicy, SchedulerConfig};
use super::cooldown::{CooldownRegistry, deadline_after};
use super::limiter::{ResourceLimiter, Slot};
use super::queue::{DelayQueue, QueueItem, WorkQueue};
use super::snapshot::{KeySnapshot, KeyState, SchedulerSnapshot, SchedulerStats};

const EVENT_BUFFER: usize = 256;

/// Messages consumed by the dispatcher loop
#[derive(Debug)]
pub(crate) enum DispatchEvent {
    /// An attempt task finished; its slot is already released
    Finished {
        index: usize,
        attempt_id: Uuid,
        outcome: Outcome,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    Shutdown,
}

/// Result of admitting a key
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Held in the delay queue until `ready_at`
    Armed { ready_at: Instant },
    Rejected { reason: String },
}

#[derive(Debug, Default)]
struct KeyRecord {
    state: KeyState,
    last_metric: Option<f64>,
    consecutive_failures: u32,
}

#[derive(Debug)]
struct RunningAttempt {
    attempt_id: Uuid,
    abort: AbortHandle,
}

/// Owns all scheduling state and runs the dispatch loop
pub struct Dispatcher {
    config: SchedulerConfig,
    sources: Arc<Sources>,
    executor: Arc<dyn JobExecutor>,
    limiter: ResourceLimiter,
    cooldowns: CooldownRegistry,
    queue: WorkQueue,
    delayed: DelayQueue,
    records: Vec<KeyRecord>,
    running: HashMap<usize, RunningAttempt>,
    stats: SchedulerStats,
    accepting: bool,
    shutdown_deadline: Option<Instant>,
    aborted: bool,
    tx: mpsc::Sender<DispatchEvent>,
    rx: mpsc::Receiver<DispatchEvent>,
}

impl Dispatcher {
    pub fn new(config: SchedulerConfig, sources: Arc<Sources>, executor: Arc<dyn JobExecutor>) -> Self {
        debug!(?config, keys = sources.keys().len(), "Dispatcher::new: called");
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let records = sources.keys().iter().map(|_| KeyRecord::default()).collect();
        Self {
            limiter: ResourceLimiter::new(config.max_concurrent),
            config,
            sources,
            executor,
            cooldowns: CooldownRegistry::new(),
            queue: WorkQueue::new(),
            delayed: DelayQueue::new(),
            records,
            running: HashMap::new(),
            stats: SchedulerStats::default(),
            accepting: true,
            shutdown_deadline: None,
            aborted: false,
            tx,
            rx,
        }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<DispatchEvent> {
        self.tx.clone()
    }

    pub fn limiter(&self) -> &ResourceLimiter {
        &self.limiter
    }

    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    pub fn key_state(&self, index: usize) -> Option<KeyState> {
        self.records.get(index).map(|record| record.state)
    }

    /// Put an idle key into the delay queue until `ready_at`
    pub fn admit(&mut self, index: usize, kind: AttemptKind, ready_at: Instant) -> Admission {
        debug!(index, %kind, "Dispatcher::admit: called");
        if !self.accepting {
            return Admission::Rejected {
                reason: "Shutting down".to_string(),
            };
        }

        let Some(record) = self.records.get_mut(index) else {
            return Admission::Rejected {
                reason: format!("Unknown key index {}", index),
            };
        };

        if record.state != KeyState::Idle {
            debug!(index, state = %record.state, "Dispatcher::admit: key not idle, rejecting");
            return Admission::Rejected {
                reason: format!("Already {}", record.state),
            };
        }

        record.state = KeyState::Delayed;
        self.delayed.push(QueueItem::new(index, kind, ready_at));
        Admission::Armed { ready_at }
    }

    /// Run until shutdown completes, returning the final counters
    pub async fn run(mut self) -> SchedulerStats {
        info!(
            keys = self.records.len(),
            capacity = %self.limiter.capacity(),
            "Dispatcher starting"
        );

        loop {
            let now = Instant::now();
            if self.accepting {
                self.promote_due(now);
                self.drain(now);
            } else if self.running.is_empty() {
                break;
            } else if let Some(deadline) = self.shutdown_deadline
                && now >= deadline
                && !self.aborted
            {
                self.abort_running();
            }

            let next_wake = if self.accepting {
                self.delayed.next_ready_at()
            } else {
                self.shutdown_deadline.filter(|_| !self.aborted)
            };

            tokio::select! {
                Some(event) = self.rx.recv() => self.handle_event(event),
                _ = self.limiter.released() => {
                    debug!("Dispatcher::run: slot released");
                }
                _ = sleep_until(next_wake.unwrap_or(now)), if next_wake.is_some() => {}
            }
        }

        info!(
            dispatched = self.stats.total_dispatched,
            succeeded = self.stats.total_succeeded,
            failed = self.stats.total_failed,
            skipped = self.stats.total_skipped,
            "Dispatcher stopped"
        );
        self.stats
    }

    fn handle_event(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Finished {
                index,
                attempt_id,
                outcome,
            } => self.on_finished(index, attempt_id, outcome),
            DispatchEvent::Snapshot { reply } => {
                if reply.send(self.snapshot()).is_err() {
                    debug!("Dispatcher::handle_event: snapshot requester went away");
                }
            }
            DispatchEvent::Shutdown => self.begin_shutdown(),
        }
    }

    /// Move every delayed item whose time has come into the work queue
    fn promote_due(&mut self, now: Instant) {
        while let Some(item) = self.delayed.pop_due(now) {
            self.records[item.index].state = KeyState::Queued;
            self.queue.enqueue(item);
        }
        self.stats.peak_queue_depth = self.stats.peak_queue_depth.max(self.queue.len());
    }

    /// Dispatch from the head of the queue while slots are free
    fn drain(&mut self, now: Instant) {
        while let Some(index) = self.queue.front().map(|item| item.index) {
            let key = &self.sources.keys()[index];
            if let Some(remaining) = self.cooldowns.remaining(key, now) {
                self.queue.pop_front();
                self.settle(index, Outcome::Skipped { remaining }, now);
                continue;
            }

            let Some((item, slot)) = self.queue.dequeue_if_capacity(&self.limiter) else {
                debug!(queued = self.queue.len(), "Dispatcher::drain: at capacity");
                break;
            };
            self.launch(item, slot, now);
        }
    }

    fn launch(&mut self, item: QueueItem, slot: Slot, now: Instant) {
        let index = item.index;
        let key = self.sources.keys()[index].clone();
        let context = self.sources.context_for(index).to_string();
        let attempt_id = Uuid::now_v7();
        let deadline = self.config.attempt_timeout();

        info!(
            ordinal = index + 1,
            %key,
            kind = %item.kind,
            %attempt_id,
            waited_secs = now.saturating_duration_since(item.enqueued_at).as_secs(),
            outstanding = self.limiter.outstanding(),
            "Launching attempt"
        );

        let executor = Arc::clone(&self.executor);
        let attempt = tokio::spawn(async move { executor.execute(&key, &context, deadline).await });
        let abort = attempt.abort_handle();
        tokio::spawn(supervise(
            index,
            attempt_id,
            attempt,
            slot,
            self.config.attempt_backstop(),
            self.tx.clone(),
        ));

        self.records[index].state = KeyState::Running;
        self.running.insert(index, RunningAttempt { attempt_id, abort });
        self.stats.total_dispatched += 1;
        self.stats.peak_concurrent = self.stats.peak_concurrent.max(self.limiter.outstanding());
    }

    fn on_finished(&mut self, index: usize, attempt_id: Uuid, outcome: Outcome) {
        match self.running.get(&index) {
            Some(attempt) if attempt.attempt_id == attempt_id => {
                self.running.remove(&index);
            }
            _ => {
                error!(index, %attempt_id, "Finished attempt does not match any running attempt");
                return;
            }
        }
        self.settle(index, outcome, Instant::now());
    }

    /// Record an outcome and re-arm the key
    fn settle(&mut self, index: usize, outcome: Outcome, now: Instant) {
        let key = self.sources.keys()[index].clone();
        let ordinal = index + 1;
        self.records[index].state = KeyState::Idle;

        let (kind, delay) = match outcome {
            Outcome::Success { metric } => {
                self.stats.total_succeeded += 1;
                let record = &mut self.records[index];
                record.last_metric = metric;
                record.consecutive_failures = 0;

                let eligible_at = self.cooldowns.record_attempt(&key, now, self.config.cooldown());
                let delay = self.success_delay(eligible_at, now);
                info!(ordinal, %key, ?metric, next_run_secs = delay.as_secs(), "Attempt succeeded");
                (AttemptKind::Scheduled, delay)
            }
            Outcome::Failure { reason } => {
                self.stats.total_failed += 1;
                let record = &mut self.records[index];
                record.consecutive_failures += 1;
                let failures = record.consecutive_failures;

                if self.config.failure_policy == FailurePolicy::RetryWindow {
                    self.cooldowns.record_attempt(&key, now, self.config.retry_delay());
                }
                let delay = self.config.retry_delay();
                warn!(ordinal, %key, %reason, failures, retry_in_secs = delay.as_secs(), "Attempt failed");
                (AttemptKind::Retry, delay)
            }
            Outcome::Skipped { remaining } => {
                self.stats.total_skipped += 1;
                info!(
                    ordinal,
                    %key,
                    remaining_mins = remaining.as_secs().div_ceil(60),
                    "Key still on cooldown, skipping"
                );
                (AttemptKind::Scheduled, remaining)
            }
        };

        if !self.accepting {
            debug!(ordinal, "Dispatcher::settle: shutting down, not re-arming");
            return;
        }
        if let Admission::Rejected { reason } = self.admit(index, kind, deadline_after(now, delay)) {
            error!(ordinal, %key, %reason, "Failed to re-arm key");
        }
    }

    /// `max(min_delay, eligible_at - now) + jitter`
    fn success_delay(&self, eligible_at: Instant, now: Instant) -> Duration {
        let wait = self.config.min_delay().max(eligible_at.saturating_duration_since(now));
        wait.saturating_add(jitter(self.config.jitter_max()))
    }

    fn begin_shutdown(&mut self) {
        if !self.accepting {
            return;
        }
        self.accepting = false;

        let dropped = self.queue.clear().len() + self.delayed.clear().len();
        for record in &mut self.records {
            if matches!(record.state, KeyState::Delayed | KeyState::Queued) {
                record.state = KeyState::Idle;
            }
        }

        self.shutdown_deadline = Some(deadline_after(Instant::now(), self.config.shutdown_timeout()));
        info!(
            in_flight = self.running.len(),
            dropped, "Shutdown requested, no new attempts will start"
        );
    }

    fn abort_running(&mut self) {
        warn!(remaining = self.running.len(), "Aborting attempts still running after shutdown timeout");
        for attempt in self.running.values() {
            attempt.abort.abort();
        }
        self.aborted = true;
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let now = Instant::now();
        let wall_now = Utc::now();
        let to_wall = |at: Instant| {
            wall_now + chrono::Duration::from_std(at.saturating_duration_since(now)).unwrap_or_else(|_| chrono::Duration::zero())
        };

        let mut next_attempts: HashMap<usize, Instant> =
            self.delayed.iter().map(|item| (item.index, item.enqueued_at)).collect();

        let keys = self
            .sources
            .keys()
            .iter()
            .zip(&self.records)
            .enumerate()
            .map(|(index, (key, record))| KeySnapshot {
                ordinal: index + 1,
                key: key.redacted(),
                state: record.state,
                eligible_at: self.cooldowns.eligible_at(key).filter(|at| *at > now).map(to_wall),
                next_attempt_at: next_attempts.remove(&index).map(to_wall),
                last_metric: record.last_metric,
                consecutive_failures: record.consecutive_failures,
            })
            .collect();

        SchedulerSnapshot {
            taken_at: wall_now,
            capacity: self.limiter.capacity(),
            outstanding: self.limiter.outstanding(),
            queue_depth: self.queue.len(),
            delayed: self.delayed.len(),
            accepting: self.accepting,
            stats: self.stats.clone(),
            keys,
        }
    }
}

/// Wait for one attempt, release its slot, then report back
async fn supervise(
    index: usize,
    attempt_id: Uuid,
    mut attempt: JoinHandle<Result<JobReport, ExecutorError>>,
    slot: Slot,
    backstop: Duration,
    tx: mpsc::Sender<DispatchEvent>,
) {
    let outcome = match tokio::time::timeout(backstop, &mut attempt).await {
        Ok(joined) => Outcome::from_join(joined),
        Err(_) => {
            warn!(ordinal = index + 1, %attempt_id, ?backstop, "Attempt overran its deadline, aborting");
            attempt.abort();
            // the slot outlives the attempt's resources
            let _ = attempt.await;
            Outcome::from_result(Err(ExecutorError::Timeout(backstop)))
        }
    };
    slot.release();

    let event = DispatchEvent::Finished {
        index,
        attempt_id,
        outcome,
    };
    if tx.send(event).await.is_err() {
        debug!(index, "supervise: dispatcher gone, dropping outcome");
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}
