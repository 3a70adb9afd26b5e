//! Filesystem backend for the versioned secret store.
//!
//! Layout: `{root}/{name}/{version:010}.json`. A version is written to a
//! hidden temp file first and then hard-linked into place, which fails if the
//! target already exists. That link is the atomic create-if-absent.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::store::versioned::{SecretDraft, SecretKind, VersionedSecret, VersionedSecretStore};
use crate::store::{Result, StoreError};

/// On-disk form of a version. Payload values are base64.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    name: String,
    version: u64,
    kind: SecretKind,
    #[serde(default)]
    labels: HashMap<String, String>,
    payload: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

impl From<&VersionedSecret> for StoredEntry {
    fn from(secret: &VersionedSecret) -> Self {
        Self {
            name: secret.name.clone(),
            version: secret.version,
            kind: secret.kind,
            labels: secret.labels.clone(),
            payload: secret
                .payload
                .iter()
                .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
                .collect(),
            created_at: secret.created_at,
        }
    }
}

pub struct FsVersionedStore {
    root: PathBuf,
}

impl FsVersionedStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn secret_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn version_path(&self, name: &str, version: u64) -> PathBuf {
        self.secret_dir(name).join(format!("{:010}.json", version))
    }

    /// Version numbers present on disk, ascending. Hidden files are temp files.
    fn list_versions(&self, name: &str) -> Result<Vec<u64>> {
        let dir = self.secret_dir(name);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::ReadFile { path: dir, source: e }),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::ReadFile {
                path: dir.clone(),
                source: e,
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(version) = file_name
                .strip_suffix(".json")
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn read_version(&self, name: &str, version: u64) -> Result<VersionedSecret> {
        let path = self.version_path(name, version);
        let content = std::fs::read(&path).map_err(|e| StoreError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let stored: StoredEntry =
            serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let mut payload = BTreeMap::new();
        for (key, value) in stored.payload {
            let bytes = STANDARD.decode(value).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: format!("payload key '{}': {}", key, e),
            })?;
            payload.insert(key, bytes);
        }

        Ok(VersionedSecret {
            name: stored.name,
            version: stored.version,
            kind: stored.kind,
            labels: stored.labels,
            payload,
            created_at: stored.created_at,
        })
    }

    fn ensure_directory(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    fn write_exclusive(&self, target: &Path, content: &[u8]) -> Result<bool> {
        let dir = target.parent().unwrap_or(&self.root);
        let temp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| StoreError::WriteFile {
                path: temp.clone(),
                source: e,
            })?;
        let written = file
            .write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::WriteFile {
                path: temp.clone(),
                source: e,
            });
        drop(file);

        let result = written.and_then(|_| match std::fs::hard_link(&temp, target) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::WriteFile {
                path: target.to_path_buf(),
                source: e,
            }),
        });

        if let Err(e) = std::fs::remove_file(&temp) {
            log::warn!("Failed to remove temp file {}: {}", temp.display(), e);
        }
        result
    }
}

#[async_trait]
impl VersionedSecretStore for FsVersionedStore {
    async fn current_version(&self, name: &str) -> Result<Option<VersionedSecret>> {
        match self.list_versions(name)?.last() {
            Some(&version) => self.read_version(name, version).map(Some),
            None => Ok(None),
        }
    }

    async fn create_version(
        &self,
        name: &str,
        version: u64,
        draft: SecretDraft,
    ) -> Result<VersionedSecret> {
        let conflict = || StoreError::VersionConflict {
            name: name.to_string(),
            version,
        };

        if self
            .list_versions(name)?
            .last()
            .is_some_and(|&latest| latest >= version)
        {
            return Err(conflict());
        }

        let dir = self.secret_dir(name);
        self.ensure_directory(&dir)?;

        let secret = draft.into_version(name, version);
        let content = serde_json::to_vec_pretty(&StoredEntry::from(&secret))?;
        let path = self.version_path(name, version);

        if !self.write_exclusive(&path, &content)? {
            return Err(conflict());
        }

        log::debug!("Stored version {} of '{}'", version, name);
        Ok(secret)
    }

    async fn versions(&self, name: &str) -> Result<Vec<VersionedSecret>> {
        self.list_versions(name)?
            .into_iter()
            .map(|version| self.read_version(name, version))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::versioned::write_next_version;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn draft(value: &[u8]) -> SecretDraft {
        SecretDraft::new(SecretKind::Manifest).with_entry("manifest.yaml", value.to_vec())
    }

    #[tokio::test]
    async fn test_versions_persist_across_instances() {
        let temp = TempDir::new().unwrap();
        let name = "default.nats.with-ops";

        {
            let store = FsVersionedStore::new(temp.path());
            store.create_next_version(name, draft(b"one")).await.unwrap();
            store.create_next_version(name, draft(b"two")).await.unwrap();
        }

        let store = FsVersionedStore::new(temp.path());
        let current = store.current_version(name).await.unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.get("manifest.yaml"), Some(&b"two"[..]));
        assert_eq!(current.kind, SecretKind::Manifest);

        let all = store.versions(name).await.unwrap();
        assert_eq!(
            all.iter().map(|s| s.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_binary_payload_survives() {
        let temp = TempDir::new().unwrap();
        let store = FsVersionedStore::new(temp.path());
        let bytes = vec![0u8, 159, 146, 150, 255];

        store.create_next_version("bin", draft(&bytes)).await.unwrap();

        let current = store.current_version("bin").await.unwrap().unwrap();
        assert_eq!(current.get("manifest.yaml"), Some(bytes.as_slice()));
    }

    #[tokio::test]
    async fn test_existing_version_conflicts() {
        let temp = TempDir::new().unwrap();
        let store = FsVersionedStore::new(temp.path());

        store.create_version("x", 1, draft(b"a")).await.unwrap();
        let err = store.create_version("x", 1, draft(b"b")).await.unwrap_err();

        assert!(matches!(err, StoreError::VersionConflict { version: 1, .. }));
        let current = store.current_version("x").await.unwrap().unwrap();
        assert_eq!(current.get("manifest.yaml"), Some(&b"a"[..]));
    }

    #[tokio::test]
    async fn test_temp_files_are_ignored_and_cleaned() {
        let temp = TempDir::new().unwrap();
        let store = FsVersionedStore::new(temp.path());

        store.create_next_version("x", draft(b"a")).await.unwrap();
        std::fs::write(temp.path().join("x").join(".tmp-stale"), b"junk").unwrap();

        assert_eq!(store.versions("x").await.unwrap().len(), 1);

        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("x"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = FsVersionedStore::new(temp.path());

        std::fs::create_dir_all(temp.path().join("x")).unwrap();
        std::fs::write(temp.path().join("x").join("0000000001.json"), b"{not json").unwrap();

        let err = store.current_version("x").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_share_a_version() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsVersionedStore::new(temp.path()));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                write_next_version(store.as_ref(), "shared", draft(&[i]), 64)
                    .await
                    .unwrap()
                    .version
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=8).collect::<Vec<u64>>());
    }
}
