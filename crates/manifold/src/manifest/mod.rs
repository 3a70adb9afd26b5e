//! The deployment manifest model.
//!
//! Only the fields the engine reads are typed; everything else is carried
//! through untouched in `extra` maps.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest is not valid YAML: {0}")]
    Yaml(#[source] serde_yaml::Error),

    #[error("Document is not a valid manifest: {0}")]
    Invalid(#[source] serde_yaml::Error),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

/// A deployment manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_groups: Vec<InstanceGroup>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub properties: Mapping,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub name: String,

    #[serde(default)]
    pub instances: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<Job>,

    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub properties: Mapping,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,

    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub properties: Mapping,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Kind of generated (or user-provided) credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Password,
    Certificate,
    Rsa,
    Ssh,
    Implicit,
}

impl VariableType {
    /// Payload field a bare `((name))` placeholder resolves to.
    pub fn default_field(&self) -> &'static str {
        match self {
            VariableType::Password => "password",
            VariableType::Certificate => "certificate",
            VariableType::Rsa | VariableType::Ssh => "private_key",
            VariableType::Implicit => "value",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::Password => "password",
            VariableType::Certificate => "certificate",
            VariableType::Rsa => "rsa",
            VariableType::Ssh => "ssh",
            VariableType::Implicit => "implicit",
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_names: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ca: bool,

    /// Name of the variable holding the signing CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl VariableOptions {
    fn is_empty(&self) -> bool {
        self == &VariableOptions::default()
    }
}

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: VariableType,

    #[serde(default, skip_serializing_if = "VariableOptions::is_empty")]
    pub options: VariableOptions,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: VariableType) -> Self {
        Self {
            name: name.into(),
            kind,
            options: VariableOptions::default(),
        }
    }
}

impl Manifest {
    /// Validates a document tree as a manifest.
    pub fn from_document(doc: Value) -> Result<Self, ManifestError> {
        serde_yaml::from_value(doc).map_err(ManifestError::Invalid)
    }

    pub fn to_document(&self) -> Result<Value, ManifestError> {
        serde_yaml::to_value(self).map_err(ManifestError::Serialize)
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        serde_yaml::to_string(self).map_err(ManifestError::Serialize)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ManifestError> {
        Self::from_document(parse_document(content.as_bytes())?)
    }

    pub fn instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|ig| ig.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Parses raw bytes into a document tree. Empty input is an empty map; any
/// other top-level value that is not a map, tagged values included, is
/// rejected.
pub fn parse_document(bytes: &[u8]) -> Result<Value, ManifestError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Mapping(Mapping::new()));
    }
    match serde_yaml::from_slice(bytes).map_err(ManifestError::Yaml)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        doc @ Value::Mapping(_) => Ok(doc),
        other => Err(ManifestError::Invalid(serde::de::Error::custom(format!(
            "expected a map at the top level, found {}",
            value_kind(&other)
        )))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a map",
        Value::Tagged(_) => "a tagged value",
    }
}
