//! Host-pumped environment executor
//!
//! Desktop UI toolkits and game engines only allow clipboard and shell
//! access from their main thread. [`QueuedEnvironmentExecutor`] posts jobs
//! to a [`HostQueue`] that the host drains from that thread, typically once
//! per frame or event-loop tick.

use async_trait::async_trait;
use bridge_traits::{
    automation::{EnvironmentExecutor, EnvironmentJob},
    error::{BridgeError, Result},
};
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

struct QueuedJob {
    job: EnvironmentJob,
    reply: oneshot::Sender<Result<()>>,
}

/// Sending half handed to the core.
#[derive(Clone)]
pub struct QueuedEnvironmentExecutor {
    sender: mpsc::UnboundedSender<QueuedJob>,
}

/// Receiving half owned by the host thread.
pub struct HostQueue {
    receiver: mpsc::UnboundedReceiver<QueuedJob>,
}

impl QueuedEnvironmentExecutor {
    pub fn new() -> (Self, HostQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, HostQueue { receiver })
    }
}

#[async_trait]
impl EnvironmentExecutor for QueuedEnvironmentExecutor {
    async fn execute(&self, job: EnvironmentJob) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send(QueuedJob { job, reply })
            .map_err(|_| BridgeError::NotAvailable("Host queue has shut down".to_string()))?;

        outcome.await.map_err(|_| {
            BridgeError::NotAvailable("Host queue dropped the job before running it".to_string())
        })?
    }
}

impl HostQueue {
    /// Run every job queued so far without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(queued) = self.receiver.try_recv() {
            Self::run(queued);
            ran += 1;
        }
        if ran > 0 {
            debug!(jobs = ran, "Ran queued environment jobs");
        }
        ran
    }

    /// Block the current thread running jobs until every executor handle is
    /// dropped. Must not be called from inside an async runtime.
    pub fn run_until_closed(mut self) {
        while let Some(queued) = self.receiver.blocking_recv() {
            Self::run(queued);
        }
    }

    /// Async variant of [`run_until_closed`](Self::run_until_closed) for
    /// hosts whose main loop is itself a task.
    pub async fn serve(mut self) {
        while let Some(queued) = self.receiver.recv().await {
            Self::run(queued);
        }
    }

    fn run(queued: QueuedJob) {
        let QueuedJob { job, reply } = queued;
        // A panicking job must not take the host's pump down with it.
        let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
            error!("Environment job panicked");
            Err(BridgeError::OperationFailed(
                "environment job panicked".to_string(),
            ))
        });
        if reply.send(result).is_err() {
            // The waiter timed out and went away; the job still ran.
            warn!("Environment job finished after its caller gave up");
        }
    }
}
