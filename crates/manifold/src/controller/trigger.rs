//! Turns watch events into work-queue entries.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};

use crate::deployment::DeploymentId;
use crate::events::{ChangeType, WatchEvent};
use crate::index::{IndexError, ReferenceIndex};
use crate::store::{ConfigObject, DeploymentStore, StoreError};

use super::queue::WorkQueue;

pub struct Trigger {
    index: Arc<ReferenceIndex>,
    queue: Arc<WorkQueue<DeploymentId>>,
    deployments: Arc<dyn DeploymentStore>,
    /// Only deployments in this namespace are scheduled; all when unset.
    namespace: Option<String>,
}

impl Trigger {
    pub fn new(
        index: Arc<ReferenceIndex>,
        queue: Arc<WorkQueue<DeploymentId>>,
        deployments: Arc<dyn DeploymentStore>,
    ) -> Self {
        Self {
            index,
            queue,
            deployments,
            namespace: None,
        }
    }

    /// Restricts scheduling to deployments in `namespace`.
    pub fn watching(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn in_scope(&self, id: &DeploymentId) -> bool {
        self.namespace
            .as_deref()
            .map_or(true, |namespace| id.namespace == namespace)
    }

    /// Enqueues every deployment affected by `event` and returns them.
    pub fn handle(&self, event: &WatchEvent) -> Result<Vec<DeploymentId>, IndexError> {
        let affected = match event {
            WatchEvent::DeploymentChanged { id, .. } if !self.in_scope(id) => Vec::new(),
            WatchEvent::DeploymentChanged { change_type, id } => {
                if *change_type == ChangeType::Deleted {
                    self.index.remove_owner(id)?;
                    self.queue.forget(id);
                }
                vec![id.clone()]
            }
            WatchEvent::ObjectCreated(object) | WatchEvent::ObjectDeleted(object) => {
                self.owners(object)?
            }
            WatchEvent::ObjectUpdated { old, new } => {
                if old.content_hash() == new.content_hash() {
                    debug!("Ignoring metadata-only update of {}", new.id);
                    Vec::new()
                } else {
                    self.owners(new)?
                }
            }
        };

        for id in &affected {
            self.queue.add(id.clone());
        }
        Ok(affected)
    }

    fn owners(&self, object: &ConfigObject) -> Result<Vec<DeploymentId>, IndexError> {
        let owners: Vec<DeploymentId> = self.index.owners_of(&object.id)?.into_iter().collect();
        if !owners.is_empty() {
            debug!("{} changed, {} dependent deployment(s)", object.id, owners.len());
        }
        Ok(owners)
    }

    /// Enqueues every known deployment. Returns how many were listed.
    pub async fn resync(&self) -> Result<usize, StoreError> {
        let ids: Vec<DeploymentId> = self
            .deployments
            .list_deployments()
            .await?
            .iter()
            .map(|d| d.id())
            .filter(|id| self.in_scope(id))
            .collect();
        for id in &ids {
            self.queue.add(id.clone());
        }
        Ok(ids.len())
    }

    /// Consumes events until the channel closes or `shutdown` flips to true.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Trigger started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.handle(&event) {
                            warn!("Failed to handle watch event: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} watch event(s), resyncing all deployments", missed);
                        match self.resync().await {
                            Ok(count) => info!("Resynced {} deployment(s)", count),
                            Err(e) => warn!("Resync failed: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Watch channel closed");
                        break;
                    }
                },
            }
        }
        debug!("Trigger stopped");
    }
}
