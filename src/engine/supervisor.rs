//! Process supervisor: runs the worker loop under a cancellable handle.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::worker::WorkerLoop;
use crate::error::{Error, Result};

/// Starts the background worker for this process.
pub struct ProcessSupervisor {
    worker: WorkerLoop,
}

impl ProcessSupervisor {
    pub fn new(worker: WorkerLoop) -> Self {
        Self { worker }
    }

    /// Spawn the worker loop under a child of `parent`.
    ///
    /// Cancelling `parent` stops the worker just like [`SupervisorHandle::stop`];
    /// cancelling the handle never touches the parent.
    pub fn start(self, parent: &CancellationToken) -> SupervisorHandle {
        let token = parent.child_token();
        let worker_token = token.clone();
        let worker = self.worker;
        let join = tokio::spawn(async move {
            let result = worker.run(worker_token.clone()).await;
            if let Err(ref e) = result {
                error!(error = %e, "report worker exited with error");
            }
            // Lets `exited()` observe a worker that stopped on its own.
            worker_token.cancel();
            result
        });
        info!("supervisor started report worker");
        SupervisorHandle {
            token,
            join: Some(join),
        }
    }
}

/// Owns the worker's cancellation token and task.
///
/// Dropping the handle cancels the worker without waiting for it.
pub struct SupervisorHandle {
    token: CancellationToken,
    join: Option<JoinHandle<Result<()>>>,
}

impl SupervisorHandle {
    /// Resolves once the worker has been told to stop or has stopped by
    /// itself (queue closed, subscription failed, parent cancelled).
    pub async fn exited(&self) {
        self.token.cancelled().await;
    }

    /// Whether the worker task is still running.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Cancel the worker and wait for it to return.
    ///
    /// The worker finishes the delivery it is processing before returning.
    /// Returns the worker's result on the first call and `Ok(())` on later
    /// calls.
    pub async fn stop(&mut self) -> Result<()> {
        self.token.cancel();
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let result = join
            .await
            .map_err(|e| Error::Other(format!("report worker task failed: {e}")))?;
        info!("supervisor stopped report worker");
        result
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
