//! Config objects and the read-only store traits the engine consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::deployment::{Deployment, DeploymentId};
use crate::store::StoreError;

/// The two storage classes a config object can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    ConfigMap,
    Secret,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::ConfigMap => "configmap",
            ObjectKind::Secret => "secret",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a config object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn config_map(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::ConfigMap, namespace, name)
    }

    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Secret, namespace, name)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A ConfigMap or Secret as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigObject {
    pub id: ObjectId,
    pub data: BTreeMap<String, Vec<u8>>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// Opaque version assigned by the backing store on every write.
    pub resource_version: u64,
}

impl ConfigObject {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            data: BTreeMap::new(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            resource_version: 0,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// SHA-256 over the data map only, so label and annotation edits hash equal.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.data {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value);
        }
        hex::encode(hasher.finalize())
    }
}

/// Read access to config objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `Ok(None)` when the object does not exist.
    async fn get_object(&self, id: &ObjectId) -> Result<Option<ConfigObject>, StoreError>;
}

/// Read access to deployment resources.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn get_deployment(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError>;

    async fn list_deployments(&self) -> Result<Vec<Deployment>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_ignores_metadata() {
        let a = ConfigObject::new(ObjectId::config_map("default", "base"))
            .with_data("manifest", "name: nats\n");
        let b = a
            .clone()
            .with_label("team", "core")
            .with_annotation("note", "edited");

        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_tracks_data() {
        let a = ConfigObject::new(ObjectId::config_map("default", "base"))
            .with_data("manifest", "name: nats\n");
        let b = a.clone().with_data("manifest", "name: redis\n");

        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_separates_keys_from_values() {
        let a = ConfigObject::new(ObjectId::secret("default", "x")).with_data("ab", "c");
        let b = ConfigObject::new(ObjectId::secret("default", "x")).with_data("a", "bc");

        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_object_id_display() {
        assert_eq!(
            ObjectId::secret("cf", "creds").to_string(),
            "secret/cf/creds"
        );
    }
}
