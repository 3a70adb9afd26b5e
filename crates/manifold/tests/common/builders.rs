//! Builders for deployments and ops files.

#![allow(dead_code)]

use manifold::deployment::{Deployment, DeploymentSpec, Reference};

pub const NAMESPACE: &str = "default";

/// Builder for `Deployment` resources.
pub struct DeploymentBuilder {
    name: String,
    namespace: String,
    manifest: Reference,
    ops: Vec<Reference>,
}

impl DeploymentBuilder {
    /// Create a builder whose manifest is the config map `base`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: NAMESPACE.to_string(),
            manifest: Reference::config_map("base"),
            ops: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn manifest(mut self, reference: Reference) -> Self {
        self.manifest = reference;
        self
    }

    pub fn ops(mut self, reference: Reference) -> Self {
        self.ops.push(reference);
        self
    }

    pub fn build(self) -> Deployment {
        let mut spec = DeploymentSpec::new(self.manifest);
        spec.ops = self.ops;
        Deployment::new(self.name, self.namespace, spec)
    }
}

/// Builder for ops file YAML.
#[derive(Default)]
pub struct OpsBuilder {
    entries: Vec<String>,
}

impl OpsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `replace`; `value` is inline YAML.
    pub fn replace(mut self, path: &str, value: &str) -> Self {
        self.entries.push(format!(
            "- type: replace\n  path: {}\n  value: {}\n",
            path, value
        ));
        self
    }

    /// Adds an `add`; `value` is inline YAML.
    pub fn add(mut self, path: &str, value: &str) -> Self {
        self.entries
            .push(format!("- type: add\n  path: {}\n  value: {}\n", path, value));
        self
    }

    pub fn remove(mut self, path: &str) -> Self {
        self.entries
            .push(format!("- type: remove\n  path: {}\n", path));
        self
    }

    pub fn build(self) -> String {
        self.entries.concat()
    }
}

/// Base manifest with groups `a` (1 instance) and `b` (2 instances).
pub fn two_group_manifest() -> &'static str {
    r#"
name: two-groups
instance_groups:
  - name: a
    instances: 1
  - name: b
    instances: 2
"#
}
