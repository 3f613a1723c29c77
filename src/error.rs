//! Error types for key ingestion, unlock and generic-key operations.

use crate::crypto::pgp::fingerprint::PgpFingerprint;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PgpError>;

/// Everything that can go wrong while handling PGP key material.
///
/// Collaborators (the OpenPGP engine, the local store, the passphrase
/// prompt) report failures as `anyhow::Error`; those are carried opaquely in
/// the `Decode`, `Engine`, `Store` and `Prompt` variants.
#[derive(Debug, Error)]
pub enum PgpError {
    /// Input text did not have the expected shape (bad hex, missing armor).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("Bad fingerprint; wrong length: {0}")]
    BadFingerprintLength(usize),

    /// The OpenPGP engine rejected the key material.
    #[error("failed to decode key material: {0}")]
    Decode(#[source] anyhow::Error),

    #[error("{0}")]
    NoKey(String),

    /// A key block held more than one distinct primary key.
    #[error("Too many keys ({0}) found; expected exactly one")]
    TooManyKeys(usize),

    #[error("Bad fingerprint; expected {expected}, got {actual}")]
    BadFingerprint {
        expected: PgpFingerprint,
        actual: PgpFingerprint,
    },

    #[error("No secret key available")]
    NoSecretKey,

    #[error("Bad key: {0}")]
    BadKey(String),

    #[error("Bad passphrase: {0}")]
    BadPassphrase(String),

    /// Nil receiver or nil comparison argument.
    #[error("Found a different key than expected")]
    UnexpectedKey,

    #[error("This type of key cannot encrypt")]
    KeyCannotEncrypt,

    #[error("This type of key cannot decrypt")]
    KeyCannotDecrypt,

    #[error("This type of key cannot sign")]
    KeyCannotSign,

    #[error("Bad signature: {0}")]
    BadSignature(String),

    #[error("never found end block line")]
    MissingArmorEnd,

    /// The passphrase prompt failed or the user declined.
    #[error("passphrase prompt failed: {0}")]
    Prompt(#[source] anyhow::Error),

    #[error("OpenPGP engine error: {0}")]
    Engine(#[source] anyhow::Error),

    #[error("local store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PgpError {
    /// Whether this error means "wrong passphrase, ask again".
    pub fn is_bad_passphrase(&self) -> bool {
        matches!(self, PgpError::BadPassphrase(_))
    }
}
