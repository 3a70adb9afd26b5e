use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::deployment::DeploymentId;

use super::queue::WorkQueue;
use super::reconciler::{DeploymentReconciler, ReconcileOutcome};

/// Tokio tasks draining the work queue into the reconciler.
pub struct WorkerPool {
    queue: Arc<WorkQueue<DeploymentId>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers on the current runtime.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        worker_count: usize,
        queue: Arc<WorkQueue<DeploymentId>>,
        reconciler: Arc<DeploymentReconciler>,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");

        let workers = (0..worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let reconciler = Arc::clone(&reconciler);
                tokio::spawn(run_worker(worker_id, queue, reconciler))
            })
            .collect();

        info!("Started {} workers", worker_count);
        Self { queue, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops handing out work. In-flight reconciles run to completion.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.queue.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// Waits for every worker to exit.
    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<WorkQueue<DeploymentId>>,
    reconciler: Arc<DeploymentReconciler>,
) {
    debug!("Worker {} started", worker_id);

    while let Some(id) = queue.get().await {
        match reconciler.reconcile(&id).await {
            Ok(outcome) => {
                if outcome == ReconcileOutcome::Skipped {
                    debug!("Worker {}: {} no longer exists", worker_id, id);
                }
                queue.forget(&id);
            }
            Err(e) => {
                let delay = queue.add_rate_limited(id.clone());
                if e.is_transient() {
                    warn!(
                        "Worker {}: reconciling {} failed, retrying in {:?}: {}",
                        worker_id, id, delay, e
                    );
                } else {
                    error!(
                        "Worker {}: reconciling {} failed, retrying in {:?}: {}",
                        worker_id, id, delay, e
                    );
                }
            }
        }
        queue.done(&id);
    }

    debug!("Worker {} received shutdown signal", worker_id);
}
