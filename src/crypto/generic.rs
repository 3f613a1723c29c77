//! Capability surface shared by every key kind.
//!
//! PGP bundles, Ed25519 signing keys and the gpg fallback all implement
//! [`GenericKey`], so callers that only need "sign this" or "who is this"
//! never branch on the key kind.

use crate::crypto::pgp::entity::HashAlgorithm;
use crate::error::{PgpError, Result};
use crate::types::{AlgoType, Kid, RawPrivateKey, RawPublicKey, SigId};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigVerifyResult {
    pub sig_id: SigId,
    /// Set when the signature verified but used a digest no longer trusted.
    pub weak_digest: Option<HashAlgorithm>,
}

/// What a derived symmetric key will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionReason {
    ChatLocalStorage,
    TeamsLocalStorage,
    Wallet,
}

/// 32-byte symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBoxKey(pub [u8; 32]);

impl fmt::Debug for SecretBoxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBoxKey([redacted])")
    }
}

/// Common interface over signing and encryption keys.
pub trait GenericKey: Send + Sync {
    fn kid(&self) -> Result<Kid>;

    fn algo_type(&self) -> AlgoType;

    /// Sign `msg`, returning the encoded signature and its id.
    fn sign_to_string(&self, msg: &[u8]) -> Result<(String, SigId)>;

    /// Verify `sig` and hand back the payload it covers.
    fn verify_string_and_extract(&self, sig: &str) -> Result<(Vec<u8>, SigVerifyResult)>;

    /// Verify `sig` and require that it covers exactly `msg`.
    fn verify_string(&self, sig: &str, msg: &[u8]) -> Result<SigVerifyResult> {
        let (payload, res) = self.verify_string_and_extract(sig)?;
        if payload != msg {
            log::warn!("Signature {} verified but covers a different payload", res.sig_id);
            return Err(PgpError::BadSignature("wrong payload".to_string()));
        }
        Ok(res)
    }

    fn encrypt_to_string(&self, plaintext: &[u8], sender: Option<&dyn GenericKey>) -> Result<String>;

    /// Returns the plaintext and the KID of the sender, when known.
    fn decrypt_from_string(&self, ciphertext: &str) -> Result<(Vec<u8>, Option<Kid>)>;

    fn secret_symmetric_key(&self, reason: EncryptionReason) -> Result<SecretBoxKey>;

    fn can_sign(&self) -> bool;

    fn can_encrypt(&self) -> bool;

    fn can_decrypt(&self) -> bool;

    fn has_secret_key(&self) -> bool;

    fn export_public_and_private(&self) -> Result<(RawPublicKey, Option<RawPrivateKey>)>;

    fn verbose_description(&self) -> String;
}

/// True when both keys resolve to the same KID.
pub fn same_kid(a: &dyn GenericKey, b: &dyn GenericKey) -> bool {
    match (a.kid(), b.kid()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
