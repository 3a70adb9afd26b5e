//! Capability for producing credential material.
//!
//! Key and certificate algorithms live outside this crate; the variable
//! engine only sees this trait.

use secrecy::SecretString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Failed to generate {kind}: {message}")]
    Failed { kind: &'static str, message: String },

    #[error("Invalid certificate request: {0}")]
    InvalidRequest(String),
}

pub struct RsaKey {
    pub private_key: SecretString,
    pub public_key: String,
}

pub struct SshKey {
    pub private_key: SecretString,
    pub public_key: String,
    pub fingerprint: String,
}

pub struct Certificate {
    pub certificate: String,
    pub private_key: SecretString,
}

/// A CA able to sign certificate requests.
pub struct CertificateAuthority {
    pub certificate: String,
    pub private_key: SecretString,
}

pub struct CertificateRequest {
    pub common_name: String,
    pub alternative_names: Vec<String>,
    pub is_ca: bool,
    /// Signing CA; `None` means self-signed.
    pub ca: Option<CertificateAuthority>,
}

pub trait Generator: Send + Sync {
    fn generate_password(&self) -> SecretString;

    fn generate_rsa_key(&self) -> Result<RsaKey, GeneratorError>;

    fn generate_ssh_key(&self) -> Result<SshKey, GeneratorError>;

    fn generate_certificate(
        &self,
        request: CertificateRequest,
    ) -> Result<Certificate, GeneratorError>;
}
