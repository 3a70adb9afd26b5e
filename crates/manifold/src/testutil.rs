//! Deterministic collaborators for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::generator::{
    Certificate, CertificateRequest, Generator, GeneratorError, RsaKey, SshKey,
};

/// A [`Generator`] producing predictable, non-cryptographic material.
///
/// Passwords and keys carry a per-instance sequence number; certificates are
/// named after their common name.
#[derive(Default)]
pub struct FakeGenerator {
    counter: AtomicU64,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items generated so far.
    pub fn generated(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Generator for FakeGenerator {
    fn generate_password(&self) -> secrecy::SecretString {
        format!("password-{}", self.next()).into()
    }

    fn generate_rsa_key(&self) -> Result<RsaKey, GeneratorError> {
        let n = self.next();
        Ok(RsaKey {
            private_key: format!("rsa-private-{}", n).into(),
            public_key: format!("rsa-public-{}", n),
        })
    }

    fn generate_ssh_key(&self) -> Result<SshKey, GeneratorError> {
        let n = self.next();
        Ok(SshKey {
            private_key: format!("ssh-private-{}", n).into(),
            public_key: format!("ssh-public-{}", n),
            fingerprint: format!("ssh-fingerprint-{}", n),
        })
    }

    fn generate_certificate(
        &self,
        request: CertificateRequest,
    ) -> Result<Certificate, GeneratorError> {
        if request.common_name.is_empty() {
            return Err(GeneratorError::InvalidRequest(
                "common name is empty".to_string(),
            ));
        }
        self.next();
        Ok(Certificate {
            certificate: format!("certificate-for-{}", request.common_name),
            private_key: format!("key-for-{}", request.common_name).into(),
        })
    }
}
