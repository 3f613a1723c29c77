//! Advisory, non-fatal notes produced while reading and inspecting keys.

use crate::crypto::pgp::entity::HashAlgorithm;
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use std::fmt;

/// A single advisory message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning(String);

impl Warning {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered collection of warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, w: Warning) {
        log::warn!("{}", w);
        self.0.push(w);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.0.iter()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.0
    }
}

/// Whose key a weak-hash finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSecurityWarningType {
    SignatureHash,
    SignersIdentityHash,
    RecipientsIdentityHash,
    OurIdentityHash,
}

/// A signature or self-signature that relies on a weak digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSecurityWarning {
    pub kind: HashSecurityWarningType,
    pub digest: HashAlgorithm,
    pub fingerprint: Option<PgpFingerprint>,
}

impl HashSecurityWarning {
    pub fn new(
        kind: HashSecurityWarningType,
        digest: HashAlgorithm,
        fingerprint: Option<PgpFingerprint>,
    ) -> Self {
        Self {
            kind,
            digest,
            fingerprint,
        }
    }
}

impl fmt::Display for HashSecurityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fp = self
            .fingerprint
            .map(|fp| fp.to_quads())
            .unwrap_or_else(|| "<unknown>".to_string());
        match self.kind {
            HashSecurityWarningType::SignatureHash => write!(
                f,
                "Message was signed using an insecure hash scheme ({})",
                self.digest
            ),
            HashSecurityWarningType::SignersIdentityHash => write!(
                f,
                "The signer's key identity ({}) was signed using an insecure hash scheme ({})",
                fp, self.digest
            ),
            HashSecurityWarningType::RecipientsIdentityHash => write!(
                f,
                "A recipient's key identity ({}) was signed using an insecure hash scheme ({})",
                fp, self.digest
            ),
            HashSecurityWarningType::OurIdentityHash => write!(
                f,
                "Our PGP key ({}) uses an insecure hash scheme ({}); consider updating its self-signatures",
                fp, self.digest
            ),
        }
    }
}

/// Ordered list of hash findings.
pub type HashSecurityWarnings = Vec<HashSecurityWarning>;
