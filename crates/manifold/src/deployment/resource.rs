//! K8s-style resource types for deployment specs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::ObjectKind;

/// The API version for all manifold resources.
pub const API_VERSION: &str = "manifold.io/v1alpha1";

/// Namespace used when a resource does not declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Implemented by every resource spec type to name its kind.
pub trait ResourceSpec {
    const KIND: &'static str;
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The unique name of the resource within its namespace.
    pub name: String,

    /// The namespace-like scope the resource lives in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Key-value labels for organizing and selecting resources.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Key-value annotations for storing additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with a name and namespace.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
        }
    }

    /// Adds a label to the metadata.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A generic K8s-style resource wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T> {
    /// API version, should always be [`API_VERSION`].
    pub api_version: String,

    /// The kind of resource.
    pub kind: String,

    /// Resource metadata.
    pub metadata: ObjectMeta,

    /// The resource specification.
    pub spec: T,
}

impl<T: ResourceSpec> Resource<T> {
    /// Creates a new resource in the given namespace.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: T) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: T::KIND.to_string(),
            metadata: ObjectMeta::new(name, namespace),
            spec,
        }
    }
}

impl<T> Resource<T> {
    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the namespace of the resource.
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Returns the identity the reconciler keys work by.
    pub fn id(&self) -> DeploymentId {
        DeploymentId::new(&self.metadata.namespace, &self.metadata.name)
    }
}

/// Identity of a deployment: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId {
    pub namespace: String,
    pub name: String,
}

impl DeploymentId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// References
// ============================================================================

/// Where the content behind a [`Reference`] is stored.
///
/// Unknown type strings are kept as [`ReferenceKind::Unsupported`] so the
/// resolver can reject them with a precise error instead of failing to load
/// the whole resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReferenceKind {
    /// A plaintext config object (ConfigMap).
    ConfigMap,
    /// A secret config object.
    Secret,
    /// A remote document fetched over HTTP(S).
    Url,
    /// Anything else.
    Unsupported(String),
}

impl ReferenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::ConfigMap => "configmap",
            ReferenceKind::Secret => "secret",
            ReferenceKind::Url => "url",
            ReferenceKind::Unsupported(kind) => kind,
        }
    }

    /// Returns the config object kind backing this reference, if any.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            ReferenceKind::ConfigMap => Some(ObjectKind::ConfigMap),
            ReferenceKind::Secret => Some(ObjectKind::Secret),
            ReferenceKind::Url | ReferenceKind::Unsupported(_) => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ReferenceKind::Unsupported(_))
    }
}

impl From<String> for ReferenceKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "configmap" => ReferenceKind::ConfigMap,
            "secret" => ReferenceKind::Secret,
            "url" => ReferenceKind::Url,
            _ => ReferenceKind::Unsupported(value),
        }
    }
}

impl From<ReferenceKind> for String {
    fn from(kind: ReferenceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pointer to a manifest or ops document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub kind: ReferenceKind,

    /// Object name for store references, full URL for `url` references.
    #[serde(rename = "ref")]
    pub name: String,
}

impl Reference {
    pub fn new(kind: ReferenceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn config_map(name: impl Into<String>) -> Self {
        Self::new(ReferenceKind::ConfigMap, name)
    }

    pub fn secret(name: impl Into<String>) -> Self {
        Self::new(ReferenceKind::Secret, name)
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(ReferenceKind::Url, url)
    }

    /// Returns the config object this reference reads, resolved in `namespace`.
    ///
    /// URL references have no watchable object and return `None`.
    pub fn object_id(&self, namespace: &str) -> Option<crate::store::ObjectId> {
        self.kind
            .object_kind()
            .map(|kind| crate::store::ObjectId::new(kind, namespace, &self.name))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

// ============================================================================
// Deployment Resource
// ============================================================================

/// Deployment specification: a base manifest plus an ordered chain of ops files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Where the base manifest lives.
    pub manifest: Reference,

    /// Ops files, applied strictly in this order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<Reference>,
}

impl DeploymentSpec {
    pub fn new(manifest: Reference) -> Self {
        Self {
            manifest,
            ops: Vec::new(),
        }
    }

    /// Appends an ops file to the overlay chain.
    pub fn with_ops(mut self, reference: Reference) -> Self {
        self.ops.push(reference);
        self
    }
}

impl ResourceSpec for DeploymentSpec {
    const KIND: &'static str = "BOSHDeployment";
}

/// A deployment resource.
pub type Deployment = Resource<DeploymentSpec>;

impl Deployment {
    /// Parses a deployment resource from YAML.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deployment_yaml() {
        let deployment = Deployment::from_yaml(
            r#"
apiVersion: manifold.io/v1alpha1
kind: BOSHDeployment
metadata:
  name: nats
  namespace: cf
spec:
  manifest:
    type: configmap
    ref: nats-manifest
  ops:
    - type: secret
      ref: scale-ops
    - type: url
      ref: https://example.com/ops.yml
"#,
        )
        .unwrap();

        assert_eq!(deployment.id(), DeploymentId::new("cf", "nats"));
        assert_eq!(deployment.spec.manifest, Reference::config_map("nats-manifest"));
        assert_eq!(deployment.spec.ops.len(), 2);
        assert_eq!(deployment.spec.ops[1].kind, ReferenceKind::Url);
    }

    #[test]
    fn test_namespace_defaults() {
        let deployment = Deployment::from_yaml(
            r#"
apiVersion: manifold.io/v1alpha1
kind: BOSHDeployment
metadata:
  name: nats
spec:
  manifest:
    type: configmap
    ref: base
"#,
        )
        .unwrap();

        assert_eq!(deployment.namespace(), DEFAULT_NAMESPACE);
        assert!(deployment.spec.ops.is_empty());
    }

    #[test]
    fn test_unknown_reference_kind_is_preserved() {
        let reference: Reference =
            serde_yaml::from_str("type: gitrepo\nref: somewhere\n").unwrap();

        assert_eq!(
            reference.kind,
            ReferenceKind::Unsupported("gitrepo".to_string())
        );
        assert!(!reference.kind.is_supported());
        assert!(reference.object_id("default").is_none());
    }

    #[test]
    fn test_reference_object_id() {
        let id = Reference::secret("creds").object_id("cf").unwrap();
        assert_eq!(id.kind, ObjectKind::Secret);
        assert_eq!(id.namespace, "cf");
        assert_eq!(id.name, "creds");

        assert!(Reference::url("https://example.com/m.yml")
            .object_id("cf")
            .is_none());
    }

    #[test]
    fn test_new_sets_kind_and_api_version() {
        let deployment = Deployment::new(
            "nats",
            "cf",
            DeploymentSpec::new(Reference::config_map("base")),
        );
        assert_eq!(deployment.api_version, API_VERSION);
        assert_eq!(deployment.kind, "BOSHDeployment");
    }
}
