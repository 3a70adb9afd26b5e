//! Retrieval of manifest and ops documents from their references.

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::deployment::{Reference, ReferenceKind};
use crate::store::{ObjectStore, StoreError};

pub use http::UrlFetcher;

/// Errors raised while fetching a referenced document.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(Reference),

    #[error("{reference} doesn't contain key {key}")]
    MissingKey { reference: Reference, key: String },

    #[error("{reference} is malformed: {message}")]
    Malformed { reference: Reference, message: String },

    #[error("Failed to fetch {reference}: {message}")]
    Transport { reference: Reference, message: String },

    #[error("Unsupported reference type '{0}'")]
    UnsupportedKind(ReferenceKind),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Bytes fetched for a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub reference: Reference,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(reference: Reference, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            reference,
            bytes: bytes.into(),
        }
    }
}

/// Retrieves the raw content behind a reference.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetches `key` from the referenced object in `namespace`.
    ///
    /// The key is ignored for URL references, which hold a single document.
    async fn fetch(
        &self,
        namespace: &str,
        reference: &Reference,
        key: &str,
    ) -> Result<RawDocument, FetchError>;
}

/// Fetches config objects through an [`ObjectStore`] and URLs over HTTP.
pub struct ObjectFetcher {
    objects: Arc<dyn ObjectStore>,
    urls: UrlFetcher,
}

impl ObjectFetcher {
    pub fn new(objects: Arc<dyn ObjectStore>, urls: UrlFetcher) -> Self {
        Self { objects, urls }
    }

    async fn fetch_object(
        &self,
        namespace: &str,
        reference: &Reference,
        key: &str,
    ) -> Result<RawDocument, FetchError> {
        let Some(id) = reference.object_id(namespace) else {
            return Err(FetchError::UnsupportedKind(reference.kind.clone()));
        };
        if reference.name.is_empty() {
            return Err(FetchError::Malformed {
                reference: reference.clone(),
                message: "empty object name".to_string(),
            });
        }

        let object = self
            .objects
            .get_object(&id)
            .await?
            .ok_or_else(|| FetchError::NotFound(reference.clone()))?;

        let bytes = object.get(key).ok_or_else(|| FetchError::MissingKey {
            reference: reference.clone(),
            key: key.to_string(),
        })?;

        Ok(RawDocument::new(reference.clone(), bytes))
    }
}

#[async_trait]
impl SourceFetcher for ObjectFetcher {
    async fn fetch(
        &self,
        namespace: &str,
        reference: &Reference,
        key: &str,
    ) -> Result<RawDocument, FetchError> {
        match &reference.kind {
            ReferenceKind::ConfigMap | ReferenceKind::Secret => {
                self.fetch_object(namespace, reference, key).await
            }
            ReferenceKind::Url => self.urls.fetch(reference).await,
            ReferenceKind::Unsupported(_) => {
                Err(FetchError::UnsupportedKind(reference.kind.clone()))
            }
        }
    }
}
