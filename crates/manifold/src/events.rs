//! Watch events delivered to the reconciliation trigger.

use crate::deployment::DeploymentId;
use crate::store::ConfigObject;

/// The type of change observed on a watched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// Event emitted by a watch source.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A deployment resource was created, updated or deleted.
    DeploymentChanged {
        change_type: ChangeType,
        id: DeploymentId,
    },
    /// A config object was created.
    ObjectCreated(ConfigObject),
    /// A config object was updated; both revisions are carried so content
    /// changes can be told apart from metadata edits.
    ObjectUpdated {
        old: ConfigObject,
        new: ConfigObject,
    },
    /// A config object was deleted.
    ObjectDeleted(ConfigObject),
}

impl WatchEvent {
    pub fn deployment(change_type: ChangeType, id: DeploymentId) -> Self {
        WatchEvent::DeploymentChanged { change_type, id }
    }
}
