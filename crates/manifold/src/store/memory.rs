//! In-process cluster holding deployments and config objects.
//!
//! Every write is broadcast as a [`WatchEvent`], the same way a real watch
//! would deliver it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::config::OperatorConfig;
use crate::deployment::{Deployment, DeploymentId};
use crate::events::{ChangeType, WatchEvent};
use crate::store::{ConfigObject, DeploymentStore, ObjectId, ObjectStore, Result, StoreError};

/// Default capacity of the watch channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct ClusterState {
    objects: HashMap<ObjectId, ConfigObject>,
    deployments: HashMap<DeploymentId, Deployment>,
    next_resource_version: u64,
}

pub struct MemoryCluster {
    state: RwLock<ClusterState>,
    sender: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl MemoryCluster {
    /// Creates a cluster whose watch channel holds `config.event_buffer`
    /// events.
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(config.event_buffer)
    }

    pub fn new(event_buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(event_buffer.max(1));
        Self {
            state: RwLock::new(ClusterState::default()),
            sender,
        }
    }

    /// Returns a receiver for watch events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }

    /// Returns the sender, for callers that inject events directly.
    pub fn sender(&self) -> broadcast::Sender<WatchEvent> {
        self.sender.clone()
    }

    fn broadcast(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Creates or replaces a config object and returns the stored revision.
    pub fn put_object(&self, mut object: ConfigObject) -> Result<ConfigObject> {
        let previous = {
            let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
            state.next_resource_version += 1;
            object.resource_version = state.next_resource_version;
            state.objects.insert(object.id.clone(), object.clone())
        };

        log::debug!("Stored object {}", object.id);
        self.broadcast(match previous {
            Some(old) => WatchEvent::ObjectUpdated {
                old,
                new: object.clone(),
            },
            None => WatchEvent::ObjectCreated(object.clone()),
        });
        Ok(object)
    }

    /// Deletes a config object; returns the removed revision if it existed.
    pub fn delete_object(&self, id: &ObjectId) -> Result<Option<ConfigObject>> {
        let removed = {
            let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
            state.objects.remove(id)
        };

        if let Some(object) = &removed {
            log::debug!("Deleted object {}", id);
            self.broadcast(WatchEvent::ObjectDeleted(object.clone()));
        }
        Ok(removed)
    }

    /// Creates or replaces a deployment resource.
    pub fn apply_deployment(&self, deployment: Deployment) -> Result<()> {
        let id = deployment.id();
        let existed = {
            let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
            state.deployments.insert(id.clone(), deployment).is_some()
        };

        let change_type = if existed {
            ChangeType::Updated
        } else {
            ChangeType::Created
        };
        log::debug!("Applied deployment {} ({:?})", id, change_type);
        self.broadcast(WatchEvent::deployment(change_type, id));
        Ok(())
    }

    pub fn delete_deployment(&self, id: &DeploymentId) -> Result<bool> {
        let existed = {
            let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
            state.deployments.remove(id).is_some()
        };

        if existed {
            log::debug!("Deleted deployment {}", id);
            self.broadcast(WatchEvent::deployment(ChangeType::Deleted, id.clone()));
        }
        Ok(existed)
    }
}

#[async_trait]
impl ObjectStore for MemoryCluster {
    async fn get_object(&self, id: &ObjectId) -> Result<Option<ConfigObject>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.objects.get(id).cloned())
    }
}

#[async_trait]
impl DeploymentStore for MemoryCluster {
    async fn get_deployment(&self, id: &DeploymentId) -> Result<Option<Deployment>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.deployments.get(id).cloned())
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut deployments: Vec<Deployment> = state.deployments.values().cloned().collect();
        deployments.sort_by_key(|d| d.id());
        Ok(deployments)
    }
}
