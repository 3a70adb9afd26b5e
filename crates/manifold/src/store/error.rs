//! Store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by object stores and the versioned secret store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Version {version} of '{name}' already exists")]
    VersionConflict { name: String, version: u64 },

    #[error("Versioned secret '{0}' not found")]
    NotFound(String),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt entry '{path}': {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Failed to serialize entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
