//! The reconciliation loop: watch events in, versioned manifests out.
//!
//! [`Trigger`] maps watch events onto the [`WorkQueue`], a [`WorkerPool`]
//! drains the queue and each worker runs the [`DeploymentReconciler`].

pub mod pool;
pub mod queue;
pub mod reconciler;
pub mod trigger;

pub use pool::WorkerPool;
pub use queue::{Backoff, WorkQueue};
pub use reconciler::{
    DeploymentReconciler, ReconcileError, ReconcileOutcome, MANIFEST_PAYLOAD_KEY,
};
pub use trigger::Trigger;

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::OperatorConfig;
use crate::deployment::DeploymentId;
use crate::error::ManifoldError;
use crate::events::WatchEvent;
use crate::fetch::{ObjectFetcher, SourceFetcher, UrlFetcher};
use crate::generator::Generator;
use crate::index::ReferenceIndex;
use crate::resolver::ManifestResolver;
use crate::store::{
    DeploymentStore, FsVersionedStore, MemoryVersionedStore, ObjectStore, VersionedSecretStore,
};
use crate::variables::VariableEngine;

struct Running {
    pool: WorkerPool,
    trigger: JoinHandle<()>,
}

/// Embeddable controller wiring the trigger, queue, workers and stores.
pub struct Controller {
    config: OperatorConfig,
    queue: Arc<WorkQueue<DeploymentId>>,
    trigger: Arc<Trigger>,
    reconciler: Arc<DeploymentReconciler>,
    index: Arc<ReferenceIndex>,
    secrets: Arc<dyn VersionedSecretStore>,
    shutdown: watch::Sender<bool>,
    running: Option<Running>,
}

impl Controller {
    pub fn new(
        config: OperatorConfig,
        deployments: Arc<dyn DeploymentStore>,
        resolver: Arc<ManifestResolver>,
        secrets: Arc<dyn VersionedSecretStore>,
    ) -> Self {
        let index = Arc::new(ReferenceIndex::new());
        let queue = Arc::new(WorkQueue::new(config.backoff()));
        let reconciler = Arc::new(DeploymentReconciler::new(
            Arc::clone(&deployments),
            resolver,
            Arc::clone(&secrets),
            Arc::clone(&index),
            config.reconcile_timeout(),
            config.max_conflict_retries,
        ));
        let trigger = Arc::new(
            Trigger::new(Arc::clone(&index), Arc::clone(&queue), deployments)
                .watching(config.namespace.clone()),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            trigger,
            reconciler,
            index,
            secrets,
            shutdown,
            running: None,
        }
    }

    /// Wires the default fetchers and the secret store named by `config`.
    pub fn build(
        config: OperatorConfig,
        objects: Arc<dyn ObjectStore>,
        deployments: Arc<dyn DeploymentStore>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, ManifoldError> {
        let secrets: Arc<dyn VersionedSecretStore> = match &config.secret_store_dir {
            Some(dir) => {
                info!("Using filesystem secret store at {}", dir.display());
                Arc::new(FsVersionedStore::new(dir))
            }
            None => Arc::new(MemoryVersionedStore::new()),
        };

        let urls = UrlFetcher::new(config.http_timeout())?;
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(ObjectFetcher::new(objects, urls));
        let variables = VariableEngine::new(Arc::clone(&secrets), generator, Arc::clone(&fetcher));
        let resolver = Arc::new(ManifestResolver::new(fetcher, variables));

        Ok(Self::new(config, deployments, resolver, secrets))
    }

    /// Queues every known deployment, then starts the trigger and workers.
    ///
    /// `events` should be subscribed before the initial listing so no change
    /// falls between the two. Calling `start` twice is a no-op.
    pub async fn start(
        &mut self,
        events: broadcast::Receiver<WatchEvent>,
    ) -> Result<(), ManifoldError> {
        if self.running.is_some() {
            warn!("Controller already started");
            return Ok(());
        }

        let queued = self.trigger.resync().await?;
        info!("Queued {} deployment(s) for initial reconcile", queued);

        let trigger = tokio::spawn(
            Arc::clone(&self.trigger).run(events, self.shutdown.subscribe()),
        );
        let pool = WorkerPool::start(
            self.config.worker_count,
            Arc::clone(&self.queue),
            Arc::clone(&self.reconciler),
        );

        self.running = Some(Running { pool, trigger });
        Ok(())
    }

    /// Stops the trigger, lets in-flight reconciles finish and waits for
    /// every worker to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        let Some(running) = self.running.take() else {
            self.queue.shutdown();
            return;
        };

        if let Err(e) = running.trigger.await {
            warn!("Trigger task failed: {:?}", e);
        }
        running.pool.shutdown();
        running.pool.wait().await;
        info!("Controller stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<ReferenceIndex> {
        &self.index
    }

    pub fn queue(&self) -> &Arc<WorkQueue<DeploymentId>> {
        &self.queue
    }

    pub fn secrets(&self) -> &Arc<dyn VersionedSecretStore> {
        &self.secrets
    }

    pub fn reconciler(&self) -> &Arc<DeploymentReconciler> {
        &self.reconciler
    }

    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }
}
