//! Logical names for versioned secrets.
//!
//! A name is `{namespace}.{deployment}.{role}` or
//! `{namespace}.{deployment}.{role}.{variable}`. Every component is
//! percent-escaped (any byte outside `[A-Za-z0-9_-]`), so `.` only ever
//! appears as a separator and the mapping can be parsed back.

use std::fmt;
use std::str::FromStr;

use crate::deployment::DeploymentId;

/// What a versioned secret holds for its deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretRole {
    /// The resolved manifest with ops applied.
    ManifestWithOps,
    /// A generated variable.
    Variable,
}

impl SecretRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretRole::ManifestWithOps => "with-ops",
            SecretRole::Variable => "var",
        }
    }
}

impl fmt::Display for SecretRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretRole {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "with-ops" => Ok(SecretRole::ManifestWithOps),
            "var" => Ok(SecretRole::Variable),
            other => Err(NameParseError(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid secret name: {0}")]
pub struct NameParseError(String);

/// Structured form of a logical secret name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretName {
    pub namespace: String,
    pub deployment: String,
    pub role: SecretRole,
    pub variable: Option<String>,
}

impl SecretName {
    pub fn manifest_with_ops(id: &DeploymentId) -> Self {
        Self {
            namespace: id.namespace.clone(),
            deployment: id.name.clone(),
            role: SecretRole::ManifestWithOps,
            variable: None,
        }
    }

    pub fn variable(id: &DeploymentId, variable: impl Into<String>) -> Self {
        Self {
            namespace: id.namespace.clone(),
            deployment: id.name.clone(),
            role: SecretRole::Variable,
            variable: Some(variable.into()),
        }
    }

    /// Parses the string form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, NameParseError> {
        let parts: Vec<&str> = s.split('.').collect();
        let (namespace, deployment, role, variable) = match parts.as_slice() {
            [ns, dep, role] => (ns, dep, role, None),
            [ns, dep, role, var] => (ns, dep, role, Some(var)),
            _ => {
                return Err(NameParseError(format!(
                    "expected 3 or 4 components in '{}'",
                    s
                )))
            }
        };

        let role: SecretRole = role.parse()?;
        match (role, variable.is_some()) {
            (SecretRole::ManifestWithOps, true) => {
                return Err(NameParseError(format!(
                    "'{}' carries a variable on a manifest name",
                    s
                )))
            }
            (SecretRole::Variable, false) => {
                return Err(NameParseError(format!("'{}' is missing its variable", s)))
            }
            _ => {}
        }

        Ok(Self {
            namespace: unescape(namespace)?,
            deployment: unescape(deployment)?,
            role,
            variable: variable.map(|v| unescape(v)).transpose()?,
        })
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            escape(&self.namespace),
            escape(&self.deployment),
            self.role
        )?;
        if let Some(variable) = &self.variable {
            write!(f, ".{}", escape(variable))?;
        }
        Ok(())
    }
}

impl FromStr for SecretName {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Name of the user-provided secret object backing an implicit variable.
///
/// Object names are lowercase and may not contain `_`, so the result is
/// lowercased with underscores turned into hyphens.
pub fn implicit_variable_object(deployment: &str, variable: &str) -> String {
    format!("{}.var-{}", deployment, variable)
        .to_lowercase()
        .replace('_', "-")
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for &b in component.as_bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn unescape(component: &str) -> Result<String, NameParseError> {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = component
                    .get(i + 1..i + 3)
                    .ok_or_else(|| NameParseError(format!("truncated escape in '{}'", component)))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| NameParseError(format!("bad escape '%{}'", hex)))?;
                out.push(byte);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            b => {
                return Err(NameParseError(format!(
                    "unescaped byte 0x{:02X} in '{}'",
                    b, component
                )))
            }
        }
    }
    String::from_utf8(out).map_err(|e| NameParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ns: &str, name: &str) -> DeploymentId {
        DeploymentId::new(ns, name)
    }

    #[test]
    fn test_plain_names() {
        assert_eq!(
            SecretName::manifest_with_ops(&id("default", "nats")).to_string(),
            "default.nats.with-ops"
        );
        assert_eq!(
            SecretName::variable(&id("cf", "nats"), "nats_password").to_string(),
            "cf.nats.var.nats_password"
        );
    }

    #[test]
    fn test_separator_is_escaped() {
        let name = SecretName::variable(&id("default", "a.b"), "c");
        assert_eq!(name.to_string(), "default.a%2Eb.var.c");
    }

    #[test]
    fn test_round_trip_is_injective() {
        let names = vec![
            SecretName::manifest_with_ops(&id("default", "a.b")),
            SecretName::variable(&id("default", "a"), "b.with-ops"),
            SecretName::variable(&id("default.a", "b"), "c"),
            SecretName::variable(&id("default", "a.b"), "c"),
            SecretName::variable(&id("ns", "dep"), "100%"),
            SecretName::variable(&id("ns", "dep"), "100%25"),
            SecretName::variable(&id("ns", "dép"), "x/y"),
        ];

        let rendered: std::collections::HashSet<String> =
            names.iter().map(|n| n.to_string()).collect();
        assert_eq!(rendered.len(), names.len());

        for name in names {
            assert_eq!(SecretName::parse(&name.to_string()).unwrap(), name);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SecretName::parse("default.nats").is_err());
        assert!(SecretName::parse("default.nats.bogus").is_err());
        assert!(SecretName::parse("default.nats.var").is_err());
        assert!(SecretName::parse("default.nats.with-ops.x").is_err());
        assert!(SecretName::parse("default.na%2.with-ops").is_err());
        assert!(SecretName::parse("default.a b.with-ops").is_err());
    }

    #[test]
    fn test_implicit_variable_object() {
        assert_eq!(
            implicit_variable_object("nats", "system_domain"),
            "nats.var-system-domain"
        );
        assert_eq!(
            implicit_variable_object("foo-deployment", "system_domain"),
            "foo-deployment.var-system-domain"
        );
        assert_eq!(
            implicit_variable_object("nats-deployment", "Customed_Password"),
            "nats-deployment.var-customed-password"
        );
    }
}
