//! Test harness around the in-memory cluster.
//!
//! The `TestHarness` struct wires an in-memory cluster, an in-memory
//! versioned secret store, a deterministic generator and a resolver, and can
//! hand out a `Controller` over the same stores.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use manifold::config::OperatorConfig;
use manifold::controller::{Controller, MANIFEST_PAYLOAD_KEY};
use manifold::deployment::{Deployment, DeploymentId};
use manifold::fetch::{ObjectFetcher, SourceFetcher, UrlFetcher};
use manifold::manifest::Manifest;
use manifold::resolver::{ManifestResolver, Resolution, ResolveError};
use manifold::store::{
    ConfigObject, MemoryCluster, MemoryVersionedStore, ObjectId, SecretName, VersionedSecret,
    VersionedSecretStore,
};
use manifold::testutil::FakeGenerator;
use manifold::variables::VariableEngine;

use super::builders::NAMESPACE;

pub struct TestHarness {
    pub cluster: Arc<MemoryCluster>,
    pub secrets: Arc<MemoryVersionedStore>,
    pub generator: Arc<FakeGenerator>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub resolver: Arc<ManifestResolver>,
}

impl TestHarness {
    pub fn new() -> Self {
        let cluster = Arc::new(MemoryCluster::default());
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(ObjectFetcher::new(
            cluster.clone(),
            UrlFetcher::new(Duration::from_secs(5)).expect("Failed to build HTTP client"),
        ));
        Self::with_fetcher(cluster, fetcher)
    }

    /// Create a harness whose resolver reads through `fetcher`.
    pub fn with_fetcher(cluster: Arc<MemoryCluster>, fetcher: Arc<dyn SourceFetcher>) -> Self {
        let secrets = Arc::new(MemoryVersionedStore::new());
        let generator = Arc::new(FakeGenerator::new());
        let variables = VariableEngine::new(secrets.clone(), generator.clone(), fetcher.clone());
        let resolver = Arc::new(ManifestResolver::new(fetcher.clone(), variables));
        Self {
            cluster,
            secrets,
            generator,
            fetcher,
            resolver,
        }
    }

    /// Stores a config map holding `key: content`.
    pub fn put_config_map(&self, name: &str, key: &str, content: &str) -> ConfigObject {
        self.cluster
            .put_object(ConfigObject::new(ObjectId::config_map(NAMESPACE, name)).with_data(key, content))
            .expect("Failed to store config map")
    }

    /// Stores a secret holding `key: content`.
    pub fn put_secret(&self, name: &str, key: &str, content: &str) -> ConfigObject {
        self.cluster
            .put_object(ConfigObject::new(ObjectId::secret(NAMESPACE, name)).with_data(key, content))
            .expect("Failed to store secret")
    }

    pub fn put_manifest(&self, name: &str, content: &str) -> ConfigObject {
        self.put_config_map(name, "manifest", content)
    }

    pub fn put_ops(&self, name: &str, content: &str) -> ConfigObject {
        self.put_config_map(name, "ops", content)
    }

    pub fn apply(&self, deployment: Deployment) {
        self.cluster
            .apply_deployment(deployment)
            .expect("Failed to apply deployment");
    }

    pub async fn resolve(&self, deployment: &Deployment) -> Result<Manifest, ResolveError> {
        self.resolver.resolve(deployment).await
    }

    pub async fn resolve_with_references(
        &self,
        deployment: &Deployment,
    ) -> Result<Resolution, ResolveError> {
        self.resolver.resolve_with_references(deployment).await
    }

    /// Config with fast retries, suitable for tests.
    pub fn config(&self) -> OperatorConfig {
        OperatorConfig {
            worker_count: 2,
            reconcile_timeout_secs: 5,
            retry_base_delay_ms: 20,
            retry_max_delay_secs: 1,
            ..OperatorConfig::default()
        }
    }

    pub fn controller(&self, config: OperatorConfig) -> Controller {
        Controller::new(
            config,
            self.cluster.clone(),
            self.resolver.clone(),
            self.secrets.clone(),
        )
    }

    /// Latest persisted manifest version for `name` in the default namespace.
    pub async fn manifest_version(&self, name: &str) -> Option<VersionedSecret> {
        let id = DeploymentId::new(NAMESPACE, name);
        self.secrets
            .current_version(&SecretName::manifest_with_ops(&id).to_string())
            .await
            .expect("Failed to read secret store")
    }

    pub async fn manifest_versions(&self, name: &str) -> Vec<VersionedSecret> {
        let id = DeploymentId::new(NAMESPACE, name);
        self.secrets
            .versions(&SecretName::manifest_with_ops(&id).to_string())
            .await
            .expect("Failed to read secret store")
    }

    /// Latest persisted manifest for `name`, parsed.
    pub async fn persisted_manifest(&self, name: &str) -> Option<Manifest> {
        let secret = self.manifest_version(name).await?;
        let yaml = secret
            .get_str(MANIFEST_PAYLOAD_KEY)
            .expect("Persisted manifest is not text");
        Some(Manifest::from_yaml(yaml).expect("Persisted manifest does not parse"))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `check` until it returns true, panicking after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
