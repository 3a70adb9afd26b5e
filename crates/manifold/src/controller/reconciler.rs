//! Reconciles a single deployment: resolve, persist, index.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::Instrument;

use crate::deployment::DeploymentId;
use crate::index::{IndexError, ReferenceIndex};
use crate::manifest::ManifestError;
use crate::resolver::{ManifestResolver, ResolveError};
use crate::store::versioned::LABEL_DEPLOYMENT;
use crate::store::{
    write_next_version, DeploymentStore, SecretDraft, SecretKind, SecretName, StoreError,
    VersionedSecretStore,
};

/// Payload key of the persisted manifest.
pub const MANIFEST_PAYLOAD_KEY: &str = "manifest.yaml";

/// What a successful reconcile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The deployment no longer exists.
    Skipped,
    /// The resolved manifest equals the stored version.
    Unchanged { version: u64 },
    /// A new manifest version was written.
    Persisted { version: u64 },
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to load deployment {id}: {source}")]
    Deployment {
        id: DeploymentId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to resolve manifest for {id}: {source}")]
    Resolve {
        id: DeploymentId,
        #[source]
        source: ResolveError,
    },

    #[error("Failed to persist manifest for {id}: {source}")]
    Persist {
        id: DeploymentId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to serialize manifest for {id}: {source}")]
    Serialize {
        id: DeploymentId,
        #[source]
        source: ManifestError,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Resolving {id} timed out after {timeout:?}")]
    Timeout { id: DeploymentId, timeout: Duration },
}

impl ReconcileError {
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Deployment { source, .. } | ReconcileError::Persist { source, .. } => {
                source.is_transient()
            }
            ReconcileError::Resolve { source, .. } => source.is_transient(),
            ReconcileError::Timeout { .. } => true,
            ReconcileError::Serialize { .. } | ReconcileError::Index(_) => false,
        }
    }
}

pub struct DeploymentReconciler {
    deployments: Arc<dyn DeploymentStore>,
    resolver: Arc<ManifestResolver>,
    secrets: Arc<dyn VersionedSecretStore>,
    index: Arc<ReferenceIndex>,
    timeout: Duration,
    max_conflict_retries: u32,
}

impl DeploymentReconciler {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        resolver: Arc<ManifestResolver>,
        secrets: Arc<dyn VersionedSecretStore>,
        index: Arc<ReferenceIndex>,
        timeout: Duration,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            deployments,
            resolver,
            secrets,
            index,
            timeout,
            max_conflict_retries,
        }
    }

    /// Runs one reconciliation of `id`.
    ///
    /// Nothing is persisted and the index is left alone unless resolution
    /// completes within the configured timeout.
    pub async fn reconcile(&self, id: &DeploymentId) -> Result<ReconcileOutcome, ReconcileError> {
        let span = tracing::info_span!("reconcile", deployment = %id);
        self.reconcile_inner(id).instrument(span).await
    }

    async fn reconcile_inner(&self, id: &DeploymentId) -> Result<ReconcileOutcome, ReconcileError> {
        let deployment = self
            .deployments
            .get_deployment(id)
            .await
            .map_err(|source| ReconcileError::Deployment {
                id: id.clone(),
                source,
            })?;

        let Some(deployment) = deployment else {
            log::debug!("Deployment {} is gone, dropping its references", id);
            self.index.remove_owner(id)?;
            return Ok(ReconcileOutcome::Skipped);
        };

        let resolution =
            tokio::time::timeout(self.timeout, self.resolver.resolve_with_references(&deployment))
                .await
                .map_err(|_| ReconcileError::Timeout {
                    id: id.clone(),
                    timeout: self.timeout,
                })?
                .map_err(|source| ReconcileError::Resolve {
                    id: id.clone(),
                    source,
                })?;

        let mut manifest = resolution.manifest.clone();
        manifest.name = deployment.name().to_string();
        let yaml = manifest
            .to_yaml()
            .map_err(|source| ReconcileError::Serialize {
                id: id.clone(),
                source,
            })?;

        let outcome = self.persist(id, yaml).await?;
        self.index
            .record_references(id, resolution.object_ids(deployment.namespace()))?;

        match outcome {
            ReconcileOutcome::Persisted { version } => {
                log::info!("Persisted manifest version {} for {}", version, id)
            }
            ReconcileOutcome::Unchanged { version } => {
                log::debug!("Manifest for {} unchanged at version {}", id, version)
            }
            ReconcileOutcome::Skipped => {}
        }
        Ok(outcome)
    }

    async fn persist(
        &self,
        id: &DeploymentId,
        yaml: String,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let name = SecretName::manifest_with_ops(id).to_string();
        let persist_failed = |source| ReconcileError::Persist {
            id: id.clone(),
            source,
        };

        let current = self
            .secrets
            .current_version(&name)
            .await
            .map_err(persist_failed)?;
        if let Some(current) = current {
            if current.get(MANIFEST_PAYLOAD_KEY) == Some(yaml.as_bytes()) {
                return Ok(ReconcileOutcome::Unchanged {
                    version: current.version,
                });
            }
        }

        let draft = SecretDraft::new(SecretKind::Manifest)
            .with_label(LABEL_DEPLOYMENT, id.name.clone())
            .with_entry(MANIFEST_PAYLOAD_KEY, yaml);
        let written = write_next_version(
            self.secrets.as_ref(),
            &name,
            draft,
            self.max_conflict_retries,
        )
        .await
        .map_err(persist_failed)?;

        Ok(ReconcileOutcome::Persisted {
            version: written.version,
        })
    }
}
