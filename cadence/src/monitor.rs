//! Periodic status reporting
//!
//! The monitor asks the scheduler for a snapshot on a fixed interval, logs a
//! one-line summary and rewrites the JSON status file read by `cadence status`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use eyre::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::scheduler::{KeyState, SchedulerHandle, SchedulerSnapshot};

pub struct Monitor {
    handle: SchedulerHandle,
    interval: Duration,
    status_path: PathBuf,
}

impl Monitor {
    pub fn new(handle: SchedulerHandle, interval: Duration, status_path: PathBuf) -> Self {
        debug!(?interval, status_path = %status_path.display(), "Monitor::new: called");
        Self {
            handle,
            interval,
            status_path,
        }
    }

    /// Report until the scheduler goes away
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let snapshot = match self.handle.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!(error = %e, "Monitor::run: scheduler gone, stopping");
                    break;
                }
            };

            info!("Status: {}", snapshot.summary());
            if let Err(e) = write_status_file(&self.status_path, &snapshot) {
                warn!(error = %e, path = %self.status_path.display(), "Failed to write status file");
            }
        }
    }
}

/// Atomically replace the status file with `snapshot`
pub fn write_status_file(path: &Path, snapshot: &SchedulerSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create status directory")?;
    }
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).context("Failed to write status file")?;
    fs::rename(&tmp, path).context("Failed to replace status file")?;
    Ok(())
}

pub fn read_status_file(path: &Path) -> Result<SchedulerSnapshot> {
    let content = fs::read_to_string(path).context(format!("Failed to read status file {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse status file")
}

fn colored_state(state: KeyState) -> String {
    let label = format!("{:<8}", state.to_string());
    match state {
        KeyState::Running => label.green().to_string(),
        KeyState::Queued => label.yellow().to_string(),
        KeyState::Delayed => label.cyan().to_string(),
        KeyState::Idle => label.dimmed().to_string(),
    }
}

/// Human-readable status table
pub fn render_text(snapshot: &SchedulerSnapshot) -> String {
    let mut out = String::new();
    out.push_str("Cadence Status\n");
    out.push_str("--------------\n");
    out.push_str(&format!("Taken at: {}\n", snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC")));
    if !snapshot.accepting {
        out.push_str(&format!("{}\n", "Shutting down".red()));
    }
    out.push_str(&format!("{}\n", snapshot.summary()));
    out.push_str(&format!("Peak concurrent: {}\n\n", snapshot.stats.peak_concurrent));

    for key in &snapshot.keys {
        let when = key
            .next_attempt_at
            .map(|at| format!("next {}", at.format("%H:%M:%S")))
            .unwrap_or_default();
        let metric = key.last_metric.map(|m| format!("metric {}", m)).unwrap_or_default();
        let failures = if key.consecutive_failures > 0 {
            format!("failures {}", key.consecutive_failures).red().to_string()
        } else {
            String::new()
        };
        let line = format!("[{:>3}] {:<12} {} {} {} {}", key.ordinal, key.key, colored_state(key.state), when, metric, failures);
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
