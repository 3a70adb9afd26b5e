//! Append-only store of immutable, monotonically versioned secrets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use crate::store::{Result, StoreError};

pub const LABEL_DEPLOYMENT: &str = "manifold.io/deployment";
pub const LABEL_KIND: &str = "manifold.io/secret-kind";
pub const LABEL_VARIABLE: &str = "manifold.io/variable";
pub const LABEL_VERSION: &str = "manifold.io/version";

/// What a versioned secret stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretKind {
    Manifest,
    Variable,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::Manifest => "manifest",
            SecretKind::Variable => "variable",
        }
    }
}

/// One immutable version of a logical secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSecret {
    pub name: String,
    pub version: u64,
    pub kind: SecretKind,
    pub labels: HashMap<String, String>,
    pub payload: BTreeMap<String, Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl VersionedSecret {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.payload.get(key).map(Vec::as_slice)
    }

    /// Returns the payload entry as UTF-8, or `None` if absent or not text.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Content for a version that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretDraft {
    pub kind: SecretKind,
    pub labels: HashMap<String, String>,
    pub payload: BTreeMap<String, Vec<u8>>,
}

impl SecretDraft {
    pub fn new(kind: SecretKind) -> Self {
        Self {
            kind,
            labels: HashMap::new(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Stamps the draft into a concrete version.
    pub(crate) fn into_version(self, name: &str, version: u64) -> VersionedSecret {
        let mut labels = self.labels;
        labels.insert(LABEL_VERSION.to_string(), version.to_string());
        labels.insert(LABEL_KIND.to_string(), self.kind.as_str().to_string());
        VersionedSecret {
            name: name.to_string(),
            version,
            kind: self.kind,
            labels,
            payload: self.payload,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait VersionedSecretStore: Send + Sync {
    /// Returns the highest version of `name`, if any.
    async fn current_version(&self, name: &str) -> Result<Option<VersionedSecret>>;

    /// Atomically creates `version` of `name`.
    ///
    /// Fails with [`StoreError::VersionConflict`] if that version, or any
    /// higher one, already exists.
    async fn create_version(
        &self,
        name: &str,
        version: u64,
        draft: SecretDraft,
    ) -> Result<VersionedSecret>;

    /// All versions of `name`, oldest first.
    async fn versions(&self, name: &str) -> Result<Vec<VersionedSecret>>;

    /// Writes current + 1 (or 1). A concurrent writer surfaces as a conflict.
    async fn create_next_version(&self, name: &str, draft: SecretDraft) -> Result<VersionedSecret> {
        let next = self
            .current_version(name)
            .await?
            .map(|s| s.version + 1)
            .unwrap_or(1);
        self.create_version(name, next, draft).await
    }
}

/// Base delay between conflict retries.
const CONFLICT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Writes the next version of `name`, retrying version conflicts up to
/// `max_retries` times.
pub async fn write_next_version(
    store: &dyn VersionedSecretStore,
    name: &str,
    draft: SecretDraft,
    max_retries: u32,
) -> Result<VersionedSecret> {
    let mut attempt = 0;
    loop {
        match store.create_next_version(name, draft.clone()).await {
            Ok(secret) => return Ok(secret),
            Err(StoreError::VersionConflict { version, .. }) if attempt < max_retries => {
                attempt += 1;
                log::debug!(
                    "Version {} of '{}' taken, retrying (attempt {}/{})",
                    version,
                    name,
                    attempt,
                    max_retries
                );
                tokio::time::sleep(CONFLICT_RETRY_DELAY * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryVersionedStore {
    entries: RwLock<HashMap<String, BTreeMap<u64, VersionedSecret>>>,
}

impl MemoryVersionedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedSecretStore for MemoryVersionedStore {
    async fn current_version(&self, name: &str) -> Result<Option<VersionedSecret>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .get(name)
            .and_then(|versions| versions.values().next_back().cloned()))
    }

    async fn create_version(
        &self,
        name: &str,
        version: u64,
        draft: SecretDraft,
    ) -> Result<VersionedSecret> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let versions = entries.entry(name.to_string()).or_default();

        if versions.range(version..).next().is_some() {
            return Err(StoreError::VersionConflict {
                name: name.to_string(),
                version,
            });
        }

        let secret = draft.into_version(name, version);
        versions.insert(version, secret.clone());
        Ok(secret)
    }

    async fn versions(&self, name: &str) -> Result<Vec<VersionedSecret>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .get(name)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }
}
