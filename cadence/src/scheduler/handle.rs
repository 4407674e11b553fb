//! Cloneable handle for talking to a running scheduler

use eyre::{Result, eyre};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::dispatcher::DispatchEvent;
use super::snapshot::SchedulerSnapshot;

/// Sends requests to the dispatcher loop
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<DispatchEvent>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<DispatchEvent>) -> Self {
        Self { tx }
    }

    /// Current state of every key
    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        debug!("SchedulerHandle::snapshot: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchEvent::Snapshot { reply })
            .await
            .map_err(|_| eyre!("Scheduler channel closed"))?;
        rx.await.map_err(|_| eyre!("Scheduler dropped snapshot request"))
    }

    /// Stop admitting work; in-flight attempts finish or time out
    pub async fn shutdown(&self) -> Result<()> {
        debug!("SchedulerHandle::shutdown: called");
        self.tx
            .send(DispatchEvent::Shutdown)
            .await
            .map_err(|_| eyre!("Scheduler channel closed"))
    }
}
