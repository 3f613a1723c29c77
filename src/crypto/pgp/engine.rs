//! Contract with the external OpenPGP engine.
//!
//! Packet parsing, serialization and the signature math live behind this
//! trait so the identity layer can be exercised against any codec (and a
//! mock in tests) without binding to one library's API.

use crate::crypto::pgp::entity::{Entity, HashAlgorithm, PrivateKey, PublicKey};
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use anyhow::Result;
use std::fmt;

/// Public-key packet tag (RFC 4880 §5.5.1.1).
pub const PUBLIC_KEY_TAG: u8 = 6;
pub const LITERAL_DATA_TAG: u8 = 11;

/// Frame `body` as a new-format packet with the given tag.
pub fn new_format_packet(tag: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len();
    let mut out = Vec::with_capacity(len + 6);
    out.push(0xC0 | tag);
    if len < 192 {
        out.push(len as u8);
    } else if len < 8384 {
        let l = len - 192;
        out.push(((l >> 8) + 192) as u8);
        out.push((l & 0xff) as u8);
    } else {
        out.push(0xff);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Serialize a v4 public key packet from its parts.
///
/// KIDs hash this exact framing, whatever header style the key was
/// originally exported with.
pub fn v4_public_key_packet(algo: u8, created: i64, material: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(6 + material.len());
    body.push(4);
    body.extend_from_slice(&(created as u32).to_be_bytes());
    body.push(algo);
    body.extend_from_slice(material);
    new_format_packet(PUBLIC_KEY_TAG, &body)
}

/// Message suffix older engines use for a failed secret-key checksum.
pub const CHECKSUM_FAILURE_SUFFIX: &str = "private key checksum failure";

/// Returned by engines when decrypted secret material fails its checksum,
/// which in practice means the passphrase was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateKeyChecksumError;

impl fmt::Display for PrivateKeyChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "openpgp: invalid data: {}", CHECKSUM_FAILURE_SUFFIX)
    }
}

impl std::error::Error for PrivateKeyChecksumError {}

/// True when an engine error stands for a checksum mismatch.
pub fn is_checksum_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PrivateKeyChecksumError>().is_some()
        || err.to_string().ends_with(CHECKSUM_FAILURE_SUFFIX)
}

/// Result of opening a signed OpenPGP message against a key.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    pub literal_data: Vec<u8>,
    pub hash: HashAlgorithm,
    /// Fingerprint of the key (primary or subkey) that produced a valid
    /// signature; `None` when no key in the supplied entity matched.
    pub signed_by: Option<PgpFingerprint>,
    /// Set when a matching key was found but the signature did not verify.
    pub signature_error: Option<String>,
}

/// Operations the identity layer needs from an OpenPGP implementation.
pub trait PgpEngine: Send + Sync {
    /// Decode binary key-ring bytes into zero or more entities.
    fn read_key_ring(&self, data: &[u8]) -> Result<Vec<Entity>>;

    /// Serialize one public key packet, including its packet header.
    fn serialize_public_key(&self, key: &PublicKey) -> Result<Vec<u8>>;

    /// Serialize the public parts of an entity (transferable public key).
    fn serialize_entity(&self, entity: &Entity) -> Result<Vec<u8>>;

    /// Serialize the entity with its private keys in their current state.
    ///
    /// `reuse_signatures` asks the engine to keep existing self-signatures
    /// instead of re-signing the components.
    fn serialize_private(&self, entity: &Entity, reuse_signatures: bool) -> Result<Vec<u8>>;

    /// Decrypt `key` in place. A wrong passphrase must surface as
    /// [`PrivateKeyChecksumError`].
    fn decrypt_private_key(&self, key: &mut PrivateKey, passphrase: &[u8]) -> Result<()>;

    /// Encrypt decrypted `key` in place under `passphrase`.
    fn encrypt_private_key(&self, key: &mut PrivateKey, passphrase: &[u8]) -> Result<()>;

    /// Produce a binary signed message over `message` with `signer`'s
    /// decrypted private key material.
    fn sign_message(&self, signer: &Entity, message: &[u8]) -> Result<Vec<u8>>;

    /// Parse a binary signed message and check it against `keyring`.
    fn read_signed_message(&self, data: &[u8], keyring: &Entity) -> Result<SignedMessage>;
}
