//! Assembles the canonical manifest for a deployment.
//!
//! Pipeline: fetch the base manifest, apply each ops file in order, then
//! substitute variables. Every config object read along the way is reported
//! so the caller can index it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::deployment::{Deployment, Reference, ReferenceKind};
use crate::fetch::{FetchError, SourceFetcher};
use crate::manifest::{parse_document, Manifest, ManifestError};
use crate::ops::{self, ApplyError, PatchError};
use crate::store::ObjectId;
use crate::variables::{VariableEngine, VariableError};

/// Content key holding a base manifest.
pub const MANIFEST_KEY: &str = "manifest";

/// Content key holding an ops file.
pub const OPS_KEY: &str = "ops";

/// Which reference of a deployment is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Manifest,
    Ops,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Manifest => f.write_str("manifest"),
            Stage::Ops => f.write_str("ops"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Unrecognized {stage} ref type: {kind}")]
    UnsupportedReferenceKind { stage: Stage, kind: ReferenceKind },

    #[error("Failed to retrieve manifest: {0}")]
    ManifestFetch(#[source] FetchError),

    #[error("Failed to parse manifest from {reference}: {source}")]
    ManifestParse {
        reference: Reference,
        #[source]
        source: ManifestError,
    },

    #[error("Failed to retrieve ops from {reference}: {source}")]
    OpsFetch {
        reference: Reference,
        #[source]
        source: FetchError,
    },

    #[error("Failed to parse ops from {reference}: {source}")]
    OpsParse {
        reference: Reference,
        #[source]
        source: PatchError,
    },

    #[error("Failed to apply ops from {reference}: {source}")]
    OpsApply {
        reference: Reference,
        #[source]
        source: ApplyError,
    },

    #[error("Failed to interpolate variables: {0}")]
    VariableResolution(#[source] VariableError),

    #[error("Resolved manifest is invalid: {0}")]
    ManifestInvalid(#[source] ManifestError),
}

impl ResolveError {
    /// Returns true if a later attempt may succeed without spec changes.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::ManifestFetch(e) | ResolveError::OpsFetch { source: e, .. } => {
                e.is_transient()
            }
            ResolveError::VariableResolution(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<VariableError> for ResolveError {
    fn from(err: VariableError) -> Self {
        match err {
            VariableError::InvalidManifest(e) => ResolveError::ManifestInvalid(e),
            other => ResolveError::VariableResolution(other),
        }
    }
}

/// A resolved manifest and the references read to produce it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub manifest: Manifest,
    pub references: Vec<Reference>,
}

impl Resolution {
    /// Config objects read during resolution. URL references are not
    /// watchable and are left out.
    pub fn object_ids(&self, namespace: &str) -> BTreeSet<ObjectId> {
        self.references
            .iter()
            .filter_map(|r| r.object_id(namespace))
            .collect()
    }
}

pub struct ManifestResolver {
    fetcher: Arc<dyn SourceFetcher>,
    variables: VariableEngine,
}

impl ManifestResolver {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, variables: VariableEngine) -> Self {
        Self { fetcher, variables }
    }

    /// Resolves the deployment's manifest.
    pub async fn resolve(&self, deployment: &Deployment) -> Result<Manifest, ResolveError> {
        Ok(self.resolve_with_references(deployment).await?.manifest)
    }

    /// Resolves the deployment's manifest and reports every reference read.
    pub async fn resolve_with_references(
        &self,
        deployment: &Deployment,
    ) -> Result<Resolution, ResolveError> {
        let namespace = deployment.namespace();
        let spec = &deployment.spec;
        let mut references = Vec::with_capacity(spec.ops.len() + 1);

        ensure_supported(&spec.manifest, Stage::Manifest)?;
        let raw = self
            .fetcher
            .fetch(namespace, &spec.manifest, MANIFEST_KEY)
            .await
            .map_err(ResolveError::ManifestFetch)?;
        references.push(spec.manifest.clone());

        let parse_failed = |source| ResolveError::ManifestParse {
            reference: spec.manifest.clone(),
            source,
        };
        let mut doc = parse_document(&raw.bytes).map_err(parse_failed)?;
        Manifest::from_document(doc.clone()).map_err(parse_failed)?;

        for reference in &spec.ops {
            ensure_supported(reference, Stage::Ops)?;
            let raw = self
                .fetcher
                .fetch(namespace, reference, OPS_KEY)
                .await
                .map_err(|source| ResolveError::OpsFetch {
                    reference: reference.clone(),
                    source,
                })?;
            references.push(reference.clone());

            let operations =
                ops::parse_ops(&raw.bytes).map_err(|source| ResolveError::OpsParse {
                    reference: reference.clone(),
                    source,
                })?;
            doc = ops::apply(&doc, &operations).map_err(|source| ResolveError::OpsApply {
                reference: reference.clone(),
                source,
            })?;
            log::debug!(
                "Applied {} operation(s) from {} to {}",
                operations.len(),
                reference,
                deployment.id()
            );
        }

        let substitution = self.variables.substitute(deployment, doc).await?;
        references.extend(substitution.references);

        Ok(Resolution {
            manifest: substitution.manifest,
            references,
        })
    }
}

fn ensure_supported(reference: &Reference, stage: Stage) -> Result<(), ResolveError> {
    if reference.kind.is_supported() {
        Ok(())
    } else {
        Err(ResolveError::UnsupportedReferenceKind {
            stage,
            kind: reference.kind.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::DeploymentSpec;
    use crate::fetch::{ObjectFetcher, UrlFetcher};
    use crate::store::{ConfigObject, MemoryCluster, MemoryVersionedStore};
    use crate::testutil::FakeGenerator;
    use std::time::Duration;

    const BASE: &str = r#"
name: foo
instance_groups:
  - name: component1
    instances: 1
  - name: component2
    instances: 2
"#;

    fn resolver(cluster: Arc<MemoryCluster>) -> ManifestResolver {
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(ObjectFetcher::new(
            cluster,
            UrlFetcher::new(Duration::from_secs(5)).unwrap(),
        ));
        let variables = VariableEngine::new(
            Arc::new(MemoryVersionedStore::new()),
            Arc::new(FakeGenerator::new()),
            fetcher.clone(),
        );
        ManifestResolver::new(fetcher, variables)
    }

    fn put(cluster: &MemoryCluster, id: ObjectId, key: &str, content: &str) {
        cluster
            .put_object(ConfigObject::new(id).with_data(key, content))
            .unwrap();
    }

    fn deployment(spec: DeploymentSpec) -> Deployment {
        Deployment::new("foo-deployment", "default", spec)
    }

    #[tokio::test]
    async fn test_resolve_with_configmap_and_secret_ops() {
        let cluster = Arc::new(MemoryCluster::default());
        put(&cluster, ObjectId::config_map("default", "base"), MANIFEST_KEY, BASE);
        put(
            &cluster,
            ObjectId::config_map("default", "replace-ops"),
            OPS_KEY,
            "- type: replace\n  path: /instance_groups/name=component1/instances\n  value: 2\n",
        );
        put(
            &cluster,
            ObjectId::secret("default", "remove-ops"),
            OPS_KEY,
            "- type: remove\n  path: /instance_groups/name=component2\n",
        );

        let resolution = resolver(cluster)
            .resolve_with_references(&deployment(
                DeploymentSpec::new(Reference::config_map("base"))
                    .with_ops(Reference::config_map("replace-ops"))
                    .with_ops(Reference::secret("remove-ops")),
            ))
            .await
            .unwrap();

        let groups = &resolution.manifest.instance_groups;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "component1");
        assert_eq!(groups[0].instances, 2);

        let ids: Vec<ObjectId> = resolution.object_ids("default").into_iter().collect();
        assert_eq!(
            ids,
            vec![
                ObjectId::config_map("default", "base"),
                ObjectId::config_map("default", "replace-ops"),
                ObjectId::secret("default", "remove-ops"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_manifest_kind() {
        let cluster = Arc::new(MemoryCluster::default());
        let err = resolver(cluster)
            .resolve(&deployment(DeploymentSpec::new(Reference::new(
                ReferenceKind::Unsupported("gitrepo".into()),
                "x",
            ))))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveError::UnsupportedReferenceKind {
                stage: Stage::Manifest,
                ..
            }
        ));
        assert!(err.to_string().contains("Unrecognized manifest ref type"));
    }

    #[tokio::test]
    async fn test_unsupported_ops_kind() {
        let cluster = Arc::new(MemoryCluster::default());
        put(&cluster, ObjectId::config_map("default", "base"), MANIFEST_KEY, BASE);

        let err = resolver(cluster)
            .resolve(&deployment(
                DeploymentSpec::new(Reference::config_map("base")).with_ops(Reference::new(
                    ReferenceKind::Unsupported("gitrepo".into()),
                    "x",
                )),
            ))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Unrecognized ops ref type"));
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let cluster = Arc::new(MemoryCluster::default());
        let err = resolver(cluster)
            .resolve(&deployment(DeploymentSpec::new(Reference::config_map("base"))))
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::ManifestFetch(FetchError::NotFound(_))));
        assert!(err.to_string().starts_with("Failed to retrieve manifest"));
    }

    #[tokio::test]
    async fn test_ops_missing_key() {
        let cluster = Arc::new(MemoryCluster::default());
        put(&cluster, ObjectId::config_map("default", "base"), MANIFEST_KEY, BASE);
        put(&cluster, ObjectId::secret("default", "bad-ops"), "wrong", "[]");

        let err = resolver(cluster)
            .resolve(&deployment(
                DeploymentSpec::new(Reference::config_map("base"))
                    .with_ops(Reference::secret("bad-ops")),
            ))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Failed to retrieve ops from"), "{}", message);
        assert!(message.contains("doesn't contain key ops"), "{}", message);
    }

    #[tokio::test]
    async fn test_ops_apply_names_reference_and_index() {
        let cluster = Arc::new(MemoryCluster::default());
        put(&cluster, ObjectId::config_map("default", "base"), MANIFEST_KEY, BASE);
        put(
            &cluster,
            ObjectId::config_map("default", "bad-path"),
            OPS_KEY,
            "- type: replace\n  path: /name\n  value: x\n- type: replace\n  path: /instance_groups/name=missing/instances\n  value: 1\n",
        );

        let err = resolver(cluster)
            .resolve(&deployment(
                DeploymentSpec::new(Reference::config_map("base"))
                    .with_ops(Reference::config_map("bad-path")),
            ))
            .await
            .unwrap_err();

        match err {
            ResolveError::OpsApply { reference, source } => {
                assert_eq!(reference, Reference::config_map("bad-path"));
                assert_eq!(source.index, 1);
                assert_eq!(source.path, "/instance_groups/name=missing/instances");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_manifest_document() {
        let cluster = Arc::new(MemoryCluster::default());
        put(
            &cluster,
            ObjectId::config_map("default", "base"),
            MANIFEST_KEY,
            "instance_groups: not-a-list\n",
        );

        let err = resolver(cluster)
            .resolve(&deployment(DeploymentSpec::new(Reference::config_map("base"))))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ManifestParse { .. }));
    }

    #[tokio::test]
    async fn test_ops_that_break_the_schema() {
        let cluster = Arc::new(MemoryCluster::default());
        put(&cluster, ObjectId::config_map("default", "base"), MANIFEST_KEY, BASE);
        put(
            &cluster,
            ObjectId::config_map("default", "breaker"),
            OPS_KEY,
            "- type: replace\n  path: /instance_groups\n  value: 7\n",
        );

        let err = resolver(cluster)
            .resolve(&deployment(
                DeploymentSpec::new(Reference::config_map("base"))
                    .with_ops(Reference::config_map("breaker")),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ManifestInvalid(_)));
    }
}
