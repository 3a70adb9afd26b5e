//! Integration tests for the reconciliation loop: watch events in, versioned
//! manifests and index edges out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    two_group_manifest, wait_until, DeploymentBuilder, OpsBuilder, TestHarness, NAMESPACE,
};
use manifold::config::OperatorConfig;
use manifold::deployment::{DeploymentId, Reference};
use manifold::fetch::{FetchError, RawDocument, SourceFetcher};
use manifold::store::{ConfigObject, MemoryCluster, ObjectId, SecretName, VersionedSecretStore};

fn foo() -> DeploymentId {
    DeploymentId::new(NAMESPACE, "foo")
}

#[tokio::test]
async fn test_new_deployment_is_persisted() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());
    h.apply(DeploymentBuilder::new("foo").build());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();

    wait_until("first manifest version", || async move {
        h.manifest_version("foo").await.is_some()
    })
    .await;

    let manifest = h.persisted_manifest("foo").await.unwrap();
    assert_eq!(manifest.name, "foo");
    assert_eq!(manifest.instance_groups.len(), 2);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_ops_content_change_writes_new_version() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());
    h.put_ops(
        "scale",
        &OpsBuilder::new().replace("/instance_groups/name=a/instances", "5").build(),
    );

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    h.apply(DeploymentBuilder::new("foo").ops(Reference::config_map("scale")).build());

    wait_until("version 1", || async move {
        h.manifest_version("foo").await.map(|s| s.version) == Some(1)
    })
    .await;

    h.put_ops(
        "scale",
        &OpsBuilder::new().replace("/instance_groups/name=a/instances", "9").build(),
    );

    wait_until("version 2", || async move {
        h.manifest_version("foo").await.map(|s| s.version) == Some(2)
    })
    .await;
    let manifest = h.persisted_manifest("foo").await.unwrap();
    assert_eq!(manifest.instance_group("a").unwrap().instances, 9);
    assert_eq!(h.manifest_versions("foo").await.len(), 2);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_metadata_only_change_keeps_version() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());
    h.apply(DeploymentBuilder::new("foo").build());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    wait_until("version 1", || async move {
        h.manifest_version("foo").await.is_some()
    })
    .await;

    h.cluster
        .put_object(
            ConfigObject::new(ObjectId::config_map(NAMESPACE, "base"))
                .with_data("manifest", two_group_manifest())
                .with_label("team", "platform"),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.manifest_versions("foo").await.len(), 1);
    controller.shutdown().await;
}

#[tokio::test]
async fn test_unchanged_resolution_is_not_rewritten() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());
    h.apply(DeploymentBuilder::new("foo").build());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    wait_until("version 1", || async move {
        h.manifest_version("foo").await.is_some()
    })
    .await;

    // Re-applying the same spec reconciles again but resolves identically.
    h.apply(DeploymentBuilder::new("foo").build());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.manifest_versions("foo").await.len(), 1);
    controller.shutdown().await;
}

#[tokio::test]
async fn test_index_follows_latest_spec() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());
    h.put_ops("old-ops", "[]");
    h.put_ops("new-ops", "[]");

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    let index = &controller.index().clone();
    let old_ops = &ObjectId::config_map(NAMESPACE, "old-ops");
    let new_ops = &ObjectId::config_map(NAMESPACE, "new-ops");

    h.apply(DeploymentBuilder::new("foo").ops(Reference::config_map("old-ops")).build());
    wait_until("old ops indexed", || async move {
        index.owners_of(old_ops).unwrap().contains(&foo())
    })
    .await;

    h.apply(DeploymentBuilder::new("foo").ops(Reference::config_map("new-ops")).build());
    wait_until("new ops indexed", || async move {
        index.owners_of(new_ops).unwrap().contains(&foo())
    })
    .await;

    assert!(index.owners_of(old_ops).unwrap().is_empty());
    assert!(index
        .owners_of(&ObjectId::config_map(NAMESPACE, "base"))
        .unwrap()
        .contains(&foo()));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_shared_object_fans_out_to_all_owners() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    h.apply(DeploymentBuilder::new("foo").build());
    h.apply(DeploymentBuilder::new("bar").build());

    wait_until("both persisted", || async move {
        h.manifest_version("foo").await.is_some() && h.manifest_version("bar").await.is_some()
    })
    .await;

    h.put_manifest(
        "base",
        "instance_groups:\n  - name: a\n    instances: 4\n",
    );

    wait_until("both rewritten", || async move {
        h.manifest_versions("foo").await.len() == 2 && h.manifest_versions("bar").await.len() == 2
    })
    .await;

    controller.shutdown().await;
}

#[tokio::test]
async fn test_burst_of_updates_converges_on_last_content() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());
    h.put_ops("scale", "[]");
    h.apply(DeploymentBuilder::new("foo").ops(Reference::config_map("scale")).build());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    wait_until("version 1", || async move {
        h.manifest_version("foo").await.is_some()
    })
    .await;

    for n in 2..=10 {
        h.put_ops(
            "scale",
            &OpsBuilder::new()
                .replace("/instance_groups/name=a/instances", &n.to_string())
                .build(),
        );
    }

    wait_until("last update persisted", || async move {
        h.persisted_manifest("foo")
            .await
            .and_then(|m| m.instance_group("a").map(|g| g.instances))
            == Some(10)
    })
    .await;

    let versions = h.manifest_versions("foo").await;
    assert!(versions.len() <= 10, "{} versions written", versions.len());
    let numbers: Vec<u64> = versions.iter().map(|s| s.version).collect();
    let expected: Vec<u64> = (1..=versions.len() as u64).collect();
    assert_eq!(numbers, expected);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_failed_resolution_is_retried_when_source_appears() {
    let h = &TestHarness::new();
    h.apply(DeploymentBuilder::new("foo").build());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.manifest_version("foo").await.is_none());

    // Not indexed yet, so only the backoff retry picks this up.
    h.put_manifest("base", two_group_manifest());
    wait_until("manifest after retry", || async move {
        h.manifest_version("foo").await.is_some()
    })
    .await;

    controller.shutdown().await;
}

#[tokio::test]
async fn test_implicit_variable_change_reconciles() {
    let h = &TestHarness::new();
    h.put_manifest("base", "name: foo\nproperties:\n  domain: ((system_domain))\n");
    h.put_secret("foo.var-system-domain", "value", "one.example.com");

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    h.apply(DeploymentBuilder::new("foo").build());

    wait_until("version 1", || async move {
        h.manifest_version("foo").await.is_some()
    })
    .await;

    h.put_secret("foo.var-system-domain", "value", "two.example.com");
    wait_until("version 2", || async move {
        h.manifest_versions("foo").await.len() == 2
    })
    .await;

    let manifest = h.persisted_manifest("foo").await.unwrap();
    assert_eq!(
        manifest.properties.get("domain").and_then(|v| v.as_str()),
        Some("two.example.com")
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn test_deleted_deployment_leaves_index() {
    let h = &TestHarness::new();
    h.put_manifest("base", two_group_manifest());

    let mut controller = h.controller(h.config());
    controller.start(h.cluster.subscribe()).await.unwrap();
    let index = &controller.index().clone();

    h.apply(DeploymentBuilder::new("foo").build());
    wait_until("indexed", || async move { !index.is_empty().unwrap() }).await;

    h.cluster.delete_deployment(&foo()).unwrap();
    wait_until("index cleared", || async move { index.is_empty().unwrap() }).await;

    // Stored versions are not garbage collected.
    assert!(h.manifest_version("foo").await.is_some());
    controller.shutdown().await;
}

struct StalledFetcher;

#[async_trait]
impl SourceFetcher for StalledFetcher {
    async fn fetch(
        &self,
        _namespace: &str,
        reference: &Reference,
        _key: &str,
    ) -> Result<RawDocument, FetchError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(RawDocument::new(reference.clone(), two_group_manifest()))
    }
}

#[tokio::test]
async fn test_timeout_persists_nothing() {
    let cluster = Arc::new(MemoryCluster::default());
    let h = &TestHarness::with_fetcher(cluster, Arc::new(StalledFetcher));
    h.apply(DeploymentBuilder::new("foo").build());

    let config = OperatorConfig {
        reconcile_timeout_secs: 1,
        ..h.config()
    };
    let mut controller = h.controller(config);
    controller.start(h.cluster.subscribe()).await.unwrap();
    let queue = &controller.queue().clone();

    wait_until("a timed out attempt", || async move {
        queue.num_requeues(&foo()) > 0
    })
    .await;

    assert!(h.manifest_version("foo").await.is_none());
    assert!(controller.index().is_empty().unwrap());

    controller.shutdown().await;
}

#[tokio::test]
async fn test_build_with_filesystem_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = OperatorConfig {
        worker_count: 1,
        secret_store_dir: Some(dir.path().to_path_buf()),
        ..OperatorConfig::default()
    };
    let cluster = Arc::new(MemoryCluster::from_config(&config));
    cluster
        .put_object(
            ConfigObject::new(ObjectId::config_map(NAMESPACE, "base"))
                .with_data("manifest", two_group_manifest()),
        )
        .unwrap();
    cluster
        .apply_deployment(DeploymentBuilder::new("foo").build())
        .unwrap();

    let mut controller = manifold::Controller::build(
        config,
        cluster.clone(),
        cluster.clone(),
        Arc::new(manifold::testutil::FakeGenerator::new()),
    )
    .unwrap();
    controller.start(cluster.subscribe()).await.unwrap();

    let secrets = &controller.secrets().clone();
    let name = &SecretName::manifest_with_ops(&foo()).to_string();
    wait_until("manifest on disk", || async move {
        secrets.current_version(name).await.unwrap().is_some()
    })
    .await;
    assert!(dir.path().join(name).is_dir());

    controller.shutdown().await;
}
