//! Variable substitution for resolved manifests.
//!
//! Declared variables are looked up in the versioned secret store and
//! generated on first use. Placeholders naming undeclared variables are
//! implicit: their values come from user-provided secret objects named
//! `<deployment>.var-<variable>`, lowercased with `_` turned into `-`.

pub mod placeholder;

use secrecy::ExposeSecret;
use serde_yaml::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::deployment::{Deployment, DeploymentId, Reference};
use crate::fetch::{FetchError, SourceFetcher};
use crate::generator::{CertificateAuthority, CertificateRequest, Generator, GeneratorError};
use crate::manifest::{Manifest, ManifestError, Variable, VariableType};
use crate::store::versioned::{LABEL_DEPLOYMENT, LABEL_VARIABLE};
use crate::store::{
    implicit_variable_object, SecretDraft, SecretKind, SecretName, StoreError, VersionedSecret,
    VersionedSecretStore,
};

pub use placeholder::{Occurrence, Placeholder};

/// Top-level manifest key holding variable declarations.
const VARIABLES_KEY: &str = "variables";

#[derive(Error, Debug)]
pub enum VariableError {
    #[error("Unresolved variable '{name}' at {location}")]
    Unresolved { name: String, location: String },

    #[error("Variable '{name}' depends on '{dependency}', which has not been generated yet")]
    DependencyNotReady { name: String, dependency: String },

    #[error("Invalid variable declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Failed to read implicit variable '{name}': {source}")]
    Fetch {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to generate variable '{name}': {source}")]
    Generation {
        name: String,
        #[source]
        source: GeneratorError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidManifest(#[from] ManifestError),
}

impl VariableError {
    pub fn is_transient(&self) -> bool {
        match self {
            VariableError::DependencyNotReady { .. } => true,
            VariableError::Fetch { source, .. } => source.is_transient(),
            VariableError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result of substitution: the final manifest plus the implicit-variable
/// objects that were read.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub manifest: Manifest,
    pub references: Vec<Reference>,
}

pub struct VariableEngine {
    secrets: Arc<dyn VersionedSecretStore>,
    generator: Arc<dyn Generator>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl VariableEngine {
    pub fn new(
        secrets: Arc<dyn VersionedSecretStore>,
        generator: Arc<dyn Generator>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            secrets,
            generator,
            fetcher,
        }
    }

    /// Resolves every placeholder in `doc` and returns the final manifest.
    pub async fn substitute(
        &self,
        deployment: &Deployment,
        mut doc: Value,
    ) -> Result<Substitution, VariableError> {
        let generated_names = generated_variable_names(&doc)?;

        let implicit = self
            .resolve_implicit(deployment, &doc, &generated_names)
            .await?;
        placeholder::rewrite(&mut doc, None, &mut |p: &Placeholder| {
            if generated_names.contains(&p.name) {
                return Ok::<_, VariableError>(None);
            }
            let field = p.field.as_deref().unwrap_or(VariableType::Implicit.default_field());
            Ok(implicit.values.get(&(p.name.clone(), field.to_string())).cloned())
        })?;

        let (declared, declared_implicit) = parse_declarations(&doc)?;
        let ensured = self.ensure_variables(&deployment.id(), &declared).await?;
        replace_declared(&mut doc, &declared, &ensured)?;
        reject_leftover_tokens(&doc)?;

        if let Value::Mapping(map) = &mut doc {
            map.shift_remove(VARIABLES_KEY);
        }
        let mut manifest = Manifest::from_document(doc)?;

        let implicit_names: BTreeSet<String> = implicit
            .names
            .into_iter()
            .chain(declared_implicit)
            .collect();
        manifest.variables = declared
            .into_iter()
            .chain(
                implicit_names
                    .into_iter()
                    .map(|name| Variable::new(name, VariableType::Implicit)),
            )
            .collect();

        Ok(Substitution {
            manifest,
            references: implicit.references,
        })
    }

    /// Fetches the value of every placeholder naming an undeclared variable.
    async fn resolve_implicit(
        &self,
        deployment: &Deployment,
        doc: &Value,
        generated_names: &HashSet<String>,
    ) -> Result<ImplicitValues, VariableError> {
        let mut implicit = ImplicitValues::default();

        for occurrence in placeholder::collect(doc, None) {
            let Occurrence {
                placeholder,
                location,
            } = occurrence;
            if generated_names.contains(&placeholder.name) {
                continue;
            }

            let field = placeholder
                .field
                .unwrap_or_else(|| VariableType::Implicit.default_field().to_string());
            let key = (placeholder.name.clone(), field);
            if implicit.values.contains_key(&key) {
                continue;
            }

            let reference =
                Reference::secret(implicit_variable_object(deployment.name(), &placeholder.name));
            if implicit.names.insert(placeholder.name.clone()) {
                implicit.references.push(reference.clone());
            }

            let raw = match self
                .fetcher
                .fetch(deployment.namespace(), &reference, &key.1)
                .await
            {
                Ok(raw) => raw,
                Err(FetchError::NotFound(_) | FetchError::MissingKey { .. }) => {
                    return Err(VariableError::Unresolved {
                        name: placeholder.name,
                        location,
                    })
                }
                Err(source) => {
                    return Err(VariableError::Fetch {
                        name: placeholder.name,
                        source,
                    })
                }
            };

            let value = String::from_utf8(raw.bytes).map_err(|e| VariableError::Fetch {
                name: placeholder.name.clone(),
                source: FetchError::Malformed {
                    reference: reference.clone(),
                    message: e.to_string(),
                },
            })?;
            log::debug!(
                "Resolved implicit variable '{}' from {}",
                placeholder.name,
                reference
            );
            implicit.values.insert(key, value);
        }

        Ok(implicit)
    }

    /// Ensures a secret exists for every declared variable, in declaration
    /// order.
    ///
    /// A certificate whose CA is missing does not stop the remaining
    /// variables from being generated; the first such dependency error is
    /// returned once all others have been ensured.
    async fn ensure_variables(
        &self,
        id: &DeploymentId,
        declared: &[Variable],
    ) -> Result<HashMap<String, VersionedSecret>, VariableError> {
        let declared_names: HashSet<&str> = declared.iter().map(|v| v.name.as_str()).collect();
        let mut ensured: HashMap<String, VersionedSecret> = HashMap::new();
        let mut pending: Option<VariableError> = None;

        for (index, variable) in declared.iter().enumerate() {
            if let Some(ca) = &variable.options.ca {
                if !declared_names.contains(ca.as_str()) {
                    return Err(VariableError::Unresolved {
                        name: ca.clone(),
                        location: format!("/{}/{}/options/ca", VARIABLES_KEY, index),
                    });
                }
            }

            match self.ensure_variable(id, variable, &ensured).await {
                Ok(secret) => {
                    ensured.insert(variable.name.clone(), secret);
                }
                Err(e @ VariableError::DependencyNotReady { .. }) => {
                    log::debug!("Deferring variable '{}': {}", variable.name, e);
                    pending.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match pending {
            Some(e) => Err(e),
            None => Ok(ensured),
        }
    }

    async fn ensure_variable(
        &self,
        id: &DeploymentId,
        variable: &Variable,
        ensured: &HashMap<String, VersionedSecret>,
    ) -> Result<VersionedSecret, VariableError> {
        let name = SecretName::variable(id, &variable.name).to_string();
        if let Some(secret) = self.secrets.current_version(&name).await? {
            return Ok(secret);
        }

        let ca = match &variable.options.ca {
            Some(ca) if variable.kind == VariableType::Certificate => {
                Some(self.load_ca(id, &variable.name, ca, ensured).await?)
            }
            _ => None,
        };

        let draft = self
            .generate(variable, ca)?
            .with_label(LABEL_DEPLOYMENT, id.name.clone())
            .with_label(LABEL_VARIABLE, variable.name.clone());

        match self.secrets.create_next_version(&name, draft).await {
            Ok(secret) => {
                log::info!(
                    "Generated {} variable '{}' for {} (version {})",
                    variable.kind,
                    variable.name,
                    id,
                    secret.version
                );
                Ok(secret)
            }
            Err(StoreError::VersionConflict { .. }) => {
                // A concurrent writer generated it first; its value wins.
                match self.secrets.current_version(&name).await? {
                    Some(secret) => Ok(secret),
                    None => Err(VariableError::Store(StoreError::NotFound(name))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_ca(
        &self,
        id: &DeploymentId,
        variable: &str,
        ca: &str,
        ensured: &HashMap<String, VersionedSecret>,
    ) -> Result<CertificateAuthority, VariableError> {
        let not_ready = || VariableError::DependencyNotReady {
            name: variable.to_string(),
            dependency: ca.to_string(),
        };

        let secret = match ensured.get(ca) {
            Some(secret) => secret.clone(),
            None => self
                .secrets
                .current_version(&SecretName::variable(id, ca).to_string())
                .await?
                .ok_or_else(not_ready)?,
        };

        match (secret.get_str("certificate"), secret.get_str("private_key")) {
            (Some(certificate), Some(private_key)) => Ok(CertificateAuthority {
                certificate: certificate.to_string(),
                private_key: private_key.to_string().into(),
            }),
            _ => Err(not_ready()),
        }
    }

    fn generate(
        &self,
        variable: &Variable,
        ca: Option<CertificateAuthority>,
    ) -> Result<SecretDraft, VariableError> {
        let failed = |source| VariableError::Generation {
            name: variable.name.clone(),
            source,
        };
        let draft = SecretDraft::new(SecretKind::Variable);

        match variable.kind {
            VariableType::Password => {
                let password = self.generator.generate_password();
                Ok(draft.with_entry("password", password.expose_secret()))
            }
            VariableType::Rsa => {
                let key = self.generator.generate_rsa_key().map_err(failed)?;
                Ok(draft
                    .with_entry("private_key", key.private_key.expose_secret())
                    .with_entry("public_key", key.public_key))
            }
            VariableType::Ssh => {
                let key = self.generator.generate_ssh_key().map_err(failed)?;
                Ok(draft
                    .with_entry("private_key", key.private_key.expose_secret())
                    .with_entry("public_key", key.public_key)
                    .with_entry("public_key_fingerprint", key.fingerprint))
            }
            VariableType::Certificate => {
                let options = &variable.options;
                let ca_certificate = ca.as_ref().map(|ca| ca.certificate.clone());
                let request = CertificateRequest {
                    common_name: options
                        .common_name
                        .clone()
                        .unwrap_or_else(|| variable.name.clone()),
                    alternative_names: options.alternative_names.clone(),
                    is_ca: options.is_ca,
                    ca,
                };
                let cert = self.generator.generate_certificate(request).map_err(failed)?;

                let ca_entry = match ca_certificate {
                    Some(ca) => Some(ca),
                    None if options.is_ca => Some(cert.certificate.clone()),
                    None => None,
                };
                let mut draft = draft
                    .with_entry("certificate", cert.certificate)
                    .with_entry("private_key", cert.private_key.expose_secret());
                if let Some(ca) = ca_entry {
                    draft = draft.with_entry("ca", ca);
                }
                Ok(draft)
            }
            VariableType::Implicit => Err(VariableError::InvalidDeclaration(format!(
                "implicit variable '{}' cannot be generated",
                variable.name
            ))),
        }
    }
}

#[derive(Default)]
struct ImplicitValues {
    /// Keyed by (variable, field).
    values: HashMap<(String, String), String>,
    names: BTreeSet<String>,
    references: Vec<Reference>,
}

/// Fails on the first `((...))` token still present outside `variables`.
/// Tokens in a shape placeholders do not support end up here.
fn reject_leftover_tokens(doc: &Value) -> Result<(), VariableError> {
    match placeholder::collect_tokens(doc, Some(VARIABLES_KEY)).into_iter().next() {
        Some(Occurrence {
            placeholder,
            location,
        }) => Err(VariableError::Unresolved {
            name: placeholder.name,
            location,
        }),
        None => Ok(()),
    }
}

/// Names of declared variables that are generated (any type but implicit).
fn generated_variable_names(doc: &Value) -> Result<HashSet<String>, VariableError> {
    let Some(entries) = variables_section(doc)? else {
        return Ok(HashSet::new());
    };

    let mut names = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                VariableError::InvalidDeclaration(format!("variable #{} has no name", index))
            })?;
        if entry.get("type").and_then(Value::as_str) != Some(VariableType::Implicit.as_str()) {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

fn variables_section(doc: &Value) -> Result<Option<&Vec<Value>>, VariableError> {
    match doc.get(VARIABLES_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(entries)) => Ok(Some(entries)),
        Some(_) => Err(VariableError::InvalidDeclaration(
            "'variables' must be a list".to_string(),
        )),
    }
}

/// Parses declarations after implicit values are in place. Returns the
/// generated variables (first declaration wins) and the names declared as
/// implicit.
fn parse_declarations(doc: &Value) -> Result<(Vec<Variable>, Vec<String>), VariableError> {
    let Some(entries) = variables_section(doc)? else {
        return Ok((Vec::new(), Vec::new()));
    };

    let mut seen = HashSet::new();
    let mut declared = Vec::new();
    let mut implicit = Vec::new();
    for entry in entries {
        let variable: Variable = serde_yaml::from_value(entry.clone())
            .map_err(|e| VariableError::InvalidDeclaration(e.to_string()))?;
        if !seen.insert(variable.name.clone()) {
            continue;
        }
        if variable.kind == VariableType::Implicit {
            implicit.push(variable.name);
        } else {
            declared.push(variable);
        }
    }
    Ok((declared, implicit))
}

/// Replaces placeholders of declared variables outside the `variables` key.
fn replace_declared(
    doc: &mut Value,
    declared: &[Variable],
    ensured: &HashMap<String, VersionedSecret>,
) -> Result<(), VariableError> {
    let kinds: HashMap<&str, VariableType> =
        declared.iter().map(|v| (v.name.as_str(), v.kind)).collect();

    let value_of = |p: &Placeholder| -> Option<(String, Option<String>)> {
        let kind = kinds.get(p.name.as_str())?;
        let field = p.field.as_deref().unwrap_or(kind.default_field());
        let value = ensured
            .get(&p.name)
            .and_then(|secret| secret.get_str(field))
            .map(str::to_string);
        Some((field.to_string(), value))
    };

    for occurrence in placeholder::collect(doc, Some(VARIABLES_KEY)) {
        if let Some((field, None)) = value_of(&occurrence.placeholder) {
            return Err(VariableError::Unresolved {
                name: format!("{}.{}", occurrence.placeholder.name, field),
                location: occurrence.location,
            });
        }
    }

    placeholder::rewrite(doc, Some(VARIABLES_KEY), &mut |p: &Placeholder| {
        Ok::<_, VariableError>(value_of(p).and_then(|(_, value)| value))
    })
}
