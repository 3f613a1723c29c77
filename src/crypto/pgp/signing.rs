//! Signing and verification for PGP key bundles.
//!
//! Signatures are attached OpenPGP messages, armored as `PGP MESSAGE`. The
//! signature id is the SHA-256 of the binary message, so the same value
//! comes out of signing and of verifying.

use crate::crypto::generic::{EncryptionReason, GenericKey, SecretBoxKey, SigVerifyResult};
use crate::crypto::pgp::armor;
use crate::crypto::pgp::bundle::KeyBundle;
use crate::crypto::pgp::entity::HashAlgorithm;
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use crate::error::{PgpError, Result};
use crate::types::{AlgoType, Kid, RawPrivateKey, RawPublicKey, SigId};

impl KeyBundle {
    /// Attached-sign `msg` with this bundle's own secret material.
    fn sign_with_engine(&self, msg: &[u8]) -> Result<(String, SigId)> {
        let body = self
            .engine()
            .sign_message(self.entity(), msg)
            .map_err(PgpError::Engine)?;
        let sig_id = SigId::from_body(&body);
        let armored = armor::encode(
            armor::BlockType::Message,
            &self.manager().config().armor_headers,
            &body,
        )?;
        log::info!(
            "Signed {} bytes with PGP key {} (sig {})",
            msg.len(),
            self.fingerprint().to_key_id(),
            sig_id
        );
        Ok((armored, sig_id))
    }

    /// Primary key or one of the subkeys.
    fn owns_key(&self, fp: &PgpFingerprint) -> bool {
        self.fingerprint() == *fp
            || self
                .entity()
                .subkeys
                .iter()
                .any(|s| s.public_key.fingerprint == *fp)
    }
}

impl GenericKey for KeyBundle {
    fn kid(&self) -> Result<Kid> {
        Ok(self.binary_kid()?.to_kid())
    }

    fn algo_type(&self) -> AlgoType {
        KeyBundle::algo_type(self)
    }

    fn sign_to_string(&self, msg: &[u8]) -> Result<(String, SigId)> {
        match self.sign_with_engine(msg) {
            Ok(out) => Ok(out),
            Err(e) => match self.gpg_fallback() {
                Some(fallback) => {
                    log::warn!(
                        "Signing with PGP key {} failed ({}), using fallback signer",
                        self.fingerprint().to_key_id(),
                        e
                    );
                    fallback.sign_to_string(msg)
                }
                None => Err(e),
            },
        }
    }

    fn verify_string_and_extract(&self, sig: &str) -> Result<(Vec<u8>, SigVerifyResult)> {
        let block = armor::decode(sig)?;
        let sig_id = SigId::from_body(&block.data);

        let opened = self
            .engine()
            .read_signed_message(&block.data, self.entity())
            .map_err(|e| PgpError::BadSignature(e.to_string()))?;

        let fail = |reason: String| -> Result<(Vec<u8>, SigVerifyResult)> {
            log::warn!(
                "Signature {} failed against PGP key {}: {}",
                sig_id,
                self.fingerprint().to_key_id(),
                reason
            );
            Err(PgpError::BadSignature(reason))
        };

        if let Some(err) = opened.signature_error {
            return fail(err);
        }
        match opened.signed_by {
            None => return fail("expected signed message".to_string()),
            Some(fp) if !self.owns_key(&fp) => {
                return fail(format!("signed by {} which is not part of this key", fp.to_key_id()))
            }
            Some(_) => {}
        }

        let weak_digest = (opened.hash == HashAlgorithm::Sha1).then_some(HashAlgorithm::Sha1);
        if weak_digest.is_some() {
            log::warn!("Signature {} uses SHA1", sig_id);
        }

        Ok((
            opened.literal_data,
            SigVerifyResult {
                sig_id,
                weak_digest,
            },
        ))
    }

    fn encrypt_to_string(&self, _plaintext: &[u8], _sender: Option<&dyn GenericKey>) -> Result<String> {
        Err(PgpError::KeyCannotEncrypt)
    }

    fn decrypt_from_string(&self, _ciphertext: &str) -> Result<(Vec<u8>, Option<Kid>)> {
        Err(PgpError::KeyCannotDecrypt)
    }

    fn secret_symmetric_key(&self, _reason: EncryptionReason) -> Result<SecretBoxKey> {
        Err(PgpError::KeyCannotEncrypt)
    }

    fn can_sign(&self) -> bool {
        KeyBundle::can_sign(self)
    }

    fn can_encrypt(&self) -> bool {
        false
    }

    fn can_decrypt(&self) -> bool {
        false
    }

    fn has_secret_key(&self) -> bool {
        KeyBundle::has_secret_key(self)
    }

    fn export_public_and_private(&self) -> Result<(RawPublicKey, Option<RawPrivateKey>)> {
        KeyBundle::export_public_and_private(self)
    }

    fn verbose_description(&self) -> String {
        KeyBundle::verbose_description(self)
    }
}
