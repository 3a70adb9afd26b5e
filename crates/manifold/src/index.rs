//! Reverse index from config objects to the deployments that read them.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;

use crate::deployment::DeploymentId;
use crate::store::ObjectId;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Reference index lock poisoned")]
    Poisoned,
}

#[derive(Default)]
struct Edges {
    /// Owner -> objects it read on its last successful resolution.
    forward: HashMap<DeploymentId, BTreeSet<ObjectId>>,
    /// Object -> owners that read it.
    reverse: HashMap<ObjectId, BTreeSet<DeploymentId>>,
}

/// Which deployments depend on which config objects.
///
/// Both directions are updated under one write lock, so readers never see a
/// partially replaced owner.
#[derive(Default)]
pub struct ReferenceIndex {
    edges: RwLock<Edges>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the full set of objects `owner` depends on.
    pub fn record_references(
        &self,
        owner: &DeploymentId,
        objects: BTreeSet<ObjectId>,
    ) -> Result<(), IndexError> {
        let mut edges = self.edges.write().map_err(|_| IndexError::Poisoned)?;
        edges.unlink(owner);
        for object in &objects {
            edges
                .reverse
                .entry(object.clone())
                .or_default()
                .insert(owner.clone());
        }
        if !objects.is_empty() {
            edges.forward.insert(owner.clone(), objects);
        }
        Ok(())
    }

    /// Deployments that read `object` on their last resolution.
    pub fn owners_of(&self, object: &ObjectId) -> Result<BTreeSet<DeploymentId>, IndexError> {
        let edges = self.edges.read().map_err(|_| IndexError::Poisoned)?;
        Ok(edges.reverse.get(object).cloned().unwrap_or_default())
    }

    /// Objects `owner` read on its last resolution.
    pub fn references_of(&self, owner: &DeploymentId) -> Result<BTreeSet<ObjectId>, IndexError> {
        let edges = self.edges.read().map_err(|_| IndexError::Poisoned)?;
        Ok(edges.forward.get(owner).cloned().unwrap_or_default())
    }

    /// Drops every edge of `owner`.
    pub fn remove_owner(&self, owner: &DeploymentId) -> Result<(), IndexError> {
        let mut edges = self.edges.write().map_err(|_| IndexError::Poisoned)?;
        edges.unlink(owner);
        Ok(())
    }

    /// Number of owners with at least one edge.
    pub fn len(&self) -> Result<usize, IndexError> {
        let edges = self.edges.read().map_err(|_| IndexError::Poisoned)?;
        Ok(edges.forward.len())
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }
}

impl Edges {
    fn unlink(&mut self, owner: &DeploymentId) {
        let Some(previous) = self.forward.remove(owner) else {
            return;
        };
        for object in previous {
            if let Some(owners) = self.reverse.get_mut(&object) {
                owners.remove(owner);
                if owners.is_empty() {
                    self.reverse.remove(&object);
                }
            }
        }
    }
}
