//! Ed25519 signing keys, the platform's non-PGP key kind.

use crate::crypto::generic::{EncryptionReason, GenericKey, SecretBoxKey, SigVerifyResult};
use crate::error::{PgpError, Result};
use crate::types::{AlgoType, BinaryKid, Kid, RawPrivateKey, RawPublicKey, SigId};
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

const SIG_VERSION: u8 = 1;

/// Self-describing signature envelope.
#[derive(Debug, Serialize, Deserialize)]
struct SigEnvelope {
    version: u8,
    kid: Kid,
    payload: String,
    sig: String,
}

pub struct NaclSigningKey {
    signing: Option<SigningKey>,
    public: VerifyingKey,
}

impl NaclSigningKey {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let public = signing.verifying_key();
        Self {
            signing: Some(signing),
            public,
        }
    }

    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut seed[..]);
        Self::from_seed(&seed)
    }

    /// Verification-only key.
    pub fn from_public(bytes: &[u8; 32]) -> Result<Self> {
        let public = VerifyingKey::from_bytes(bytes)
            .map_err(|e| PgpError::BadKey(format!("invalid Ed25519 public key: {}", e)))?;
        Ok(Self {
            signing: None,
            public,
        })
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    fn binary_kid(&self) -> BinaryKid {
        BinaryKid::new(AlgoType::NaclEddsa.as_byte(), self.public.as_bytes())
    }
}

fn decode_b64(field: &str, s: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(s)
        .map_err(|e| PgpError::MalformedInput(format!("bad base64 in {}: {}", field, e)))
}

impl GenericKey for NaclSigningKey {
    fn kid(&self) -> Result<Kid> {
        Ok(self.binary_kid().to_kid())
    }

    fn algo_type(&self) -> AlgoType {
        AlgoType::NaclEddsa
    }

    fn sign_to_string(&self, msg: &[u8]) -> Result<(String, SigId)> {
        let signing = self.signing.as_ref().ok_or(PgpError::NoSecretKey)?;
        let sig: Signature = signing.sign(msg);

        let envelope = SigEnvelope {
            version: SIG_VERSION,
            kid: self.binary_kid().to_kid(),
            payload: general_purpose::STANDARD.encode(msg),
            sig: general_purpose::STANDARD.encode(sig.to_bytes()),
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| PgpError::Engine(anyhow::Error::new(e)))?;
        let sig_id = SigId::from_body(&body);
        Ok((general_purpose::STANDARD.encode(&body), sig_id))
    }

    fn verify_string_and_extract(&self, sig: &str) -> Result<(Vec<u8>, SigVerifyResult)> {
        let body = decode_b64("signature", sig.trim())?;
        let envelope: SigEnvelope = serde_json::from_slice(&body)
            .map_err(|e| PgpError::MalformedInput(format!("bad signature envelope: {}", e)))?;

        if envelope.version != SIG_VERSION {
            return Err(PgpError::BadSignature(format!(
                "unsupported signature version {}",
                envelope.version
            )));
        }
        if envelope.kid != self.binary_kid().to_kid() {
            return Err(PgpError::BadSignature(format!(
                "signed by {} instead of {}",
                envelope.kid,
                self.binary_kid().to_kid()
            )));
        }

        let payload = decode_b64("payload", &envelope.payload)?;
        let raw_sig = decode_b64("sig", &envelope.sig)?;
        let raw_sig: [u8; 64] = raw_sig
            .as_slice()
            .try_into()
            .map_err(|_| PgpError::BadSignature("signature must be 64 bytes".to_string()))?;

        self.public
            .verify(&payload, &Signature::from_bytes(&raw_sig))
            .map_err(|e| PgpError::BadSignature(e.to_string()))?;

        Ok((
            payload,
            SigVerifyResult {
                sig_id: SigId::from_body(&body),
                weak_digest: None,
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
        self.signing.is_some()
    }

    fn can_encrypt(&self) -> bool {
        false
    }

    fn can_decrypt(&self) -> bool {
        false
    }

    fn has_secret_key(&self) -> bool {
        self.signing.is_some()
    }

    fn export_public_and_private(&self) -> Result<(RawPublicKey, Option<RawPrivateKey>)> {
        let private = self
            .signing
            .as_ref()
            .map(|k| RawPrivateKey(k.to_bytes().to_vec()));
        Ok((RawPublicKey(self.public.to_bytes().to_vec()), private))
    }

    fn verbose_description(&self) -> String {
        format!("Ed25519 key {}", self.binary_kid().to_kid())
    }
}

impl fmt::Debug for NaclSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NaclSigningKey")
            .field("kid", &self.binary_kid().to_kid())
            .field("has_secret", &self.signing.is_some())
            .finish()
    }
}
