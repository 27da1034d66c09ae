//! Worker supervisor — runs a fixed set of workers for one leadership term.
//!
//! Each worker gets its own task and its own stop channel. Stopping only
//! signals; callers that need the workers gone wait separately, with a
//! bound, via [`WorkerSupervisor::join_stopped`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ElectionError, ElectionResult};

/// A long-running unit of work that only runs while this process leads.
///
/// `run` must return promptly once `stop` flips to `true`. The same
/// value is started again for every leadership term.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run until `stop` is signalled.
    async fn run(&self, stop: watch::Receiver<bool>) -> anyhow::Result<()>;
}

/// A worker started for the current term.
struct ActiveWorker {
    name: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Starts and stops a fixed, ordered set of workers.
pub struct WorkerSupervisor {
    workers: Vec<Arc<dyn Runnable>>,
    /// Workers of the current term.
    active: Vec<ActiveWorker>,
    /// Workers that were signalled but not yet joined.
    stopping: Vec<ActiveWorker>,
}

impl WorkerSupervisor {
    /// Create a supervisor for `workers`. Nothing is started yet.
    pub fn new(workers: Vec<Arc<dyn Runnable>>) -> Self {
        Self {
            workers,
            active: Vec::new(),
            stopping: Vec::new(),
        }
    }

    /// True between `start_all` and `stop_all`.
    pub fn is_running(&self) -> bool {
        !self.active.is_empty()
    }

    /// Number of workers started for the current term.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Spawn every worker with a fresh stop signal. Does not block.
    ///
    /// Starting again without an intervening `stop_all` is an invariant
    /// violation.
    pub fn start_all(&mut self) -> ElectionResult<usize> {
        if self.is_running() {
            return Err(ElectionError::InvariantViolation(format!(
                "start_all called while {} workers are still running",
                self.active.len()
            )));
        }
        // Finished workers from earlier terms need no further tracking.
        self.stopping.retain(|worker| !worker.handle.is_finished());

        for worker in &self.workers {
            let (stop_tx, stop_rx) = watch::channel(false);
            let name = worker.name().to_string();
            let runnable = Arc::clone(worker);
            let task_name = name.clone();

            let handle = tokio::spawn(async move {
                debug!(worker = %task_name, "worker starting");
                match runnable.run(stop_rx).await {
                    Ok(()) => debug!(worker = %task_name, "worker exited"),
                    Err(e) => error!(worker = %task_name, error = %e, "worker failed"),
                }
            });

            self.active.push(ActiveWorker {
                name,
                stop_tx,
                handle,
            });
        }

        info!(count = self.active.len(), "workers started");
        Ok(self.active.len())
    }

    /// Signal every running worker to stop. Does not wait.
    ///
    /// Returns the number of workers signalled.
    pub fn stop_all(&mut self) -> usize {
        let count = self.active.len();
        for worker in self.active.drain(..) {
            // A worker that already exited has dropped its receiver.
            let _ = worker.stop_tx.send(true);
            debug!(worker = %worker.name, "stop signalled");
            self.stopping.push(worker);
        }
        if count > 0 {
            info!(count, "workers signalled to stop");
        }
        count
    }

    /// Wait up to `grace` for signalled workers to exit, then abort the
    /// rest. Returns how many had to be aborted.
    pub async fn join_stopped(&mut self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for mut worker in self.stopping.drain(..) {
            match tokio::time::timeout_at(deadline, &mut worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    error!(worker = %worker.name, "worker panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(worker = %worker.name, ?grace, "worker ignored stop signal, aborting");
                    worker.handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        for worker in self.active.iter().chain(self.stopping.iter()) {
            let _ = worker.stop_tx.send(true);
        }
    }
}
