//! Deterministic in-process OpenPGP engine for tests
//!
//! Key rings are JSON lists of [`WireEntity`]. Public key packets follow
//! the real v4 layout (tag, new-format length, version, creation time,
//! algorithm, material) so KID derivation sees genuine header lengths.
//! Keys sign with Ed25519: the first 32 bytes of the public material are
//! the verifying key and the secret is the 32-byte seed.

use crate::crypto::pgp::engine::{
    v4_public_key_packet, PgpEngine, PrivateKeyChecksumError, SignedMessage,
};
use crate::crypto::pgp::entity::{
    BadSubkey, Entity, HashAlgorithm, Identity, PrivateKey, PublicKey, PublicKeyAlgorithm,
    Signature, SignatureType, Subkey,
};
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature as EdSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const SEED_LEN: usize = 32;
const CHECK_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireKey {
    pub algo: u8,
    pub created: i64,
    pub bits: u16,
    pub material: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WireSecret {
    Plain { seed: String },
    Sealed { blob: String },
    Stub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSig {
    pub sig_type: u8,
    pub hash: u8,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireIdentity {
    pub name: String,
    pub sig: Option<WireSig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSubkey {
    pub key: WireKey,
    pub secret: Option<WireSecret>,
    pub sig: WireSig,
    pub revocation: Option<WireSig>,
    #[serde(default)]
    pub broken: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntity {
    pub primary: WireKey,
    pub secret: Option<WireSecret>,
    pub identities: Vec<WireIdentity>,
    pub revocations: Vec<WireSig>,
    pub subkeys: Vec<WireSubkey>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSignedMessage {
    literal: String,
    hash: u8,
    issuer: String,
    sig: String,
}

pub fn fingerprint_of(algo: u8, created: i64, material: &[u8]) -> PgpFingerprint {
    let digest = Sha256::digest(v4_public_key_packet(algo, created, material));
    let mut fp = [0u8; 20];
    fp.copy_from_slice(&digest[..20]);
    PgpFingerprint::new(fp)
}

/// Encrypt a 32-byte seed under `passphrase`.
pub fn seal(seed: &[u8], passphrase: &[u8], salt: [u8; SALT_LEN]) -> Vec<u8> {
    let pad = keystream(&salt, passphrase);
    let mut out = salt.to_vec();
    out.extend(seed.iter().zip(pad.iter()).map(|(a, b)| a ^ b));
    out.extend_from_slice(&Sha256::digest(seed)[..CHECK_LEN]);
    out
}

fn keystream(salt: &[u8], passphrase: &[u8]) -> [u8; SEED_LEN] {
    let mut h = Sha256::new();
    h.update(salt);
    h.update(passphrase);
    h.finalize().into()
}

fn unseal(blob: &[u8], passphrase: &[u8]) -> Result<Vec<u8>> {
    if blob.len() != SALT_LEN + SEED_LEN + CHECK_LEN {
        bail!("mock engine: sealed secret has wrong length {}", blob.len());
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (cipher, check) = rest.split_at(SEED_LEN);
    let pad = keystream(salt, passphrase);
    let seed: Vec<u8> = cipher.iter().zip(pad.iter()).map(|(a, b)| a ^ b).collect();
    if &Sha256::digest(&seed)[..CHECK_LEN] != check {
        return Err(anyhow::Error::new(PrivateKeyChecksumError));
    }
    Ok(seed)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("mock engine: bad timestamp {}", secs))
}

fn seed_array(seed: &[u8]) -> Result<[u8; SEED_LEN]> {
    seed.try_into()
        .map_err(|_| anyhow!("mock engine: seed must be {} bytes", SEED_LEN))
}

fn verifying_key(material: &[u8]) -> Result<VerifyingKey> {
    let bytes: [u8; 32] = material
        .get(..32)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| anyhow!("mock engine: public material too short"))?;
    VerifyingKey::from_bytes(&bytes).context("mock engine: bad verifying key")
}

fn signed_bytes(hash: u8, literal: &[u8]) -> Vec<u8> {
    let mut out = vec![hash];
    out.extend_from_slice(literal);
    out
}

/// Swap the literal data of a signed message, keeping its signature.
pub fn replace_signed_literal(data: &[u8], literal: &[u8]) -> Vec<u8> {
    let mut msg: WireSignedMessage = serde_json::from_slice(data).expect("mock signed message");
    msg.literal = hex::encode(literal);
    serde_json::to_vec(&msg).expect("serialize mock signed message")
}

/// Mock engine with switchable signing behaviour.
#[derive(Debug)]
pub struct MockEngine {
    signing_hash: HashAlgorithm,
    failing_signer: bool,
    last_reuse: Mutex<Option<bool>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            signing_hash: HashAlgorithm::Sha256,
            failing_signer: false,
            last_reuse: Mutex::new(None),
        }
    }

    /// Stamp produced signatures with `hash`.
    pub fn with_signing_hash(mut self, hash: HashAlgorithm) -> Self {
        self.signing_hash = hash;
        self
    }

    /// Make every signing attempt fail.
    pub fn with_failing_signer(mut self) -> Self {
        self.failing_signer = true;
        self
    }

    /// The `reuse_signatures` flag of the most recent private serialization.
    pub fn last_reuse_signatures(&self) -> Option<bool> {
        *self.last_reuse.lock().expect("reuse flag lock")
    }

    fn public_key(&self, wire: &WireKey) -> Result<PublicKey> {
        let material = hex::decode(&wire.material).context("mock engine: bad key material")?;
        let fingerprint = fingerprint_of(wire.algo, wire.created, &material);
        let mut id = [0u8; 8];
        id.copy_from_slice(&fingerprint.as_bytes()[12..]);
        Ok(PublicKey {
            algorithm: PublicKeyAlgorithm::from_byte(wire.algo),
            fingerprint,
            key_id: u64::from_be_bytes(id),
            created_at: timestamp(wire.created)?,
            bit_length: wire.bits,
            material,
        })
    }

    fn private_key(&self, wire: &WireSecret) -> Result<PrivateKey> {
        Ok(match wire {
            WireSecret::Plain { seed } => {
                PrivateKey::decrypted(hex::decode(seed).context("mock engine: bad seed")?)
            }
            WireSecret::Sealed { blob } => {
                PrivateKey::encrypted(hex::decode(blob).context("mock engine: bad sealed blob")?)
            }
            WireSecret::Stub => PrivateKey::stub(),
        })
    }

    fn signature(&self, wire: &WireSig) -> Result<Signature> {
        let mut sig = Signature::new(
            SignatureType::from_byte(wire.sig_type),
            HashAlgorithm::from_byte(wire.hash),
            timestamp(wire.created)?,
        );
        sig.is_primary_id = wire.primary;
        sig.key_lifetime_secs = wire.lifetime;
        Ok(sig)
    }

    fn entity(&self, wire: &WireEntity) -> Result<Entity> {
        let mut subkeys = Vec::new();
        let mut bad_subkeys = Vec::new();
        for sub in &wire.subkeys {
            if sub.broken {
                bad_subkeys.push(BadSubkey {
                    error: format!("unsupported public key algorithm {}", sub.key.algo),
                });
                continue;
            }
            subkeys.push(Subkey {
                public_key: self.public_key(&sub.key)?,
                private_key: sub.secret.as_ref().map(|s| self.private_key(s)).transpose()?,
                sig: self.signature(&sub.sig)?,
                revocation: sub.revocation.as_ref().map(|s| self.signature(s)).transpose()?,
                native: None,
            });
        }

        let identities = wire
            .identities
            .iter()
            .map(|id| {
                let sig = id.sig.as_ref().map(|s| self.signature(s)).transpose()?;
                Ok(Identity::new(&id.name, sig))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Entity {
            primary_key: self.public_key(&wire.primary)?,
            private_key: wire.secret.as_ref().map(|s| self.private_key(s)).transpose()?,
            identities,
            revocations: wire
                .revocations
                .iter()
                .map(|s| self.signature(s))
                .collect::<Result<Vec<_>>>()?,
            subkeys,
            bad_subkeys,
            native: None,
        })
    }

    fn wire_key(key: &PublicKey) -> WireKey {
        WireKey {
            algo: key.algorithm.as_byte(),
            created: key.created_at.timestamp(),
            bits: key.bit_length,
            material: hex::encode(&key.material),
        }
    }

    fn wire_sig(sig: &Signature) -> WireSig {
        WireSig {
            sig_type: sig.sig_type.as_byte(),
            hash: sig.hash.as_byte(),
            created: sig.created_at.timestamp(),
            primary: sig.is_primary_id,
            lifetime: sig.key_lifetime_secs,
        }
    }

    fn wire_secret(key: &PrivateKey) -> WireSecret {
        if key.encrypted {
            WireSecret::Sealed {
                blob: hex::encode(key.sealed.as_deref().unwrap_or_default()),
            }
        } else if let Some(material) = &key.material {
            WireSecret::Plain {
                seed: hex::encode(material.as_slice()),
            }
        } else {
            WireSecret::Stub
        }
    }

    fn wire_entity(entity: &Entity, private: bool) -> WireEntity {
        WireEntity {
            primary: Self::wire_key(&entity.primary_key),
            secret: if private {
                entity.private_key.as_ref().map(Self::wire_secret)
            } else {
                None
            },
            identities: entity
                .identities
                .iter()
                .map(|id| WireIdentity {
                    name: id.name.clone(),
                    sig: id.self_signature.as_ref().map(Self::wire_sig),
                })
                .collect(),
            revocations: entity.revocations.iter().map(Self::wire_sig).collect(),
            subkeys: entity
                .subkeys
                .iter()
                .map(|s| WireSubkey {
                    key: Self::wire_key(&s.public_key),
                    secret: if private {
                        s.private_key.as_ref().map(Self::wire_secret)
                    } else {
                        None
                    },
                    sig: Self::wire_sig(&s.sig),
                    revocation: s.revocation.as_ref().map(Self::wire_sig),
                    broken: false,
                })
                .collect(),
        }
    }
}

impl PgpEngine for MockEngine {
    fn read_key_ring(&self, data: &[u8]) -> Result<Vec<Entity>> {
        let wire: Vec<WireEntity> =
            serde_json::from_slice(data).context("mock engine: not a key ring")?;
        wire.iter().map(|e| self.entity(e)).collect()
    }

    fn serialize_public_key(&self, key: &PublicKey) -> Result<Vec<u8>> {
        Ok(v4_public_key_packet(
            key.algorithm.as_byte(),
            key.created_at.timestamp(),
            &key.material,
        ))
    }

    fn serialize_entity(&self, entity: &Entity) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&vec![Self::wire_entity(entity, false)])?)
    }

    fn serialize_private(&self, entity: &Entity, reuse_signatures: bool) -> Result<Vec<u8>> {
        *self
            .last_reuse
            .lock()
            .map_err(|_| anyhow!("mock engine: lock poisoned"))? = Some(reuse_signatures);
        Ok(serde_json::to_vec(&vec![Self::wire_entity(entity, true)])?)
    }

    fn decrypt_private_key(&self, key: &mut PrivateKey, passphrase: &[u8]) -> Result<()> {
        if !key.encrypted {
            return Ok(());
        }
        let sealed = key
            .sealed
            .as_deref()
            .ok_or_else(|| anyhow!("mock engine: encrypted key without sealed data"))?;
        let seed = unseal(sealed, passphrase)?;
        key.material = Some(Zeroizing::new(seed));
        key.sealed = None;
        key.encrypted = false;
        Ok(())
    }

    fn encrypt_private_key(&self, key: &mut PrivateKey, passphrase: &[u8]) -> Result<()> {
        let material = key
            .material
            .take()
            .ok_or_else(|| anyhow!("mock engine: nothing to encrypt"))?;
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        key.sealed = Some(seal(&material, passphrase, salt));
        key.encrypted = true;
        Ok(())
    }

    fn sign_message(&self, signer: &Entity, message: &[u8]) -> Result<Vec<u8>> {
        if self.failing_signer {
            bail!("mock engine: signer disabled");
        }

        let primary = signer
            .private_key
            .as_ref()
            .filter(|k| k.has_material())
            .map(|k| (k, signer.fingerprint()));
        let (key, issuer) = primary
            .or_else(|| {
                signer.subkeys.iter().find_map(|s| {
                    s.private_key
                        .as_ref()
                        .filter(|k| k.has_material())
                        .map(|k| (k, s.public_key.fingerprint))
                })
            })
            .ok_or_else(|| anyhow!("mock engine: no decrypted signing key"))?;

        let seed = key
            .material
            .as_ref()
            .ok_or_else(|| anyhow!("mock engine: no decrypted signing key"))?;
        let signing = SigningKey::from_bytes(&seed_array(seed)?);
        let hash = self.signing_hash.as_byte();
        let sig = signing.sign(&signed_bytes(hash, message));

        let msg = WireSignedMessage {
            literal: hex::encode(message),
            hash,
            issuer: issuer.to_string(),
            sig: hex::encode(sig.to_bytes()),
        };
        Ok(serde_json::to_vec(&msg)?)
    }

    fn read_signed_message(&self, data: &[u8], keyring: &Entity) -> Result<SignedMessage> {
        let msg: WireSignedMessage =
            serde_json::from_slice(data).context("mock engine: not a signed message")?;
        let literal = hex::decode(&msg.literal).context("mock engine: bad literal data")?;
        let issuer = PgpFingerprint::from_hex(&msg.issuer)?;
        let hash = HashAlgorithm::from_byte(msg.hash);

        let key = std::iter::once(&keyring.primary_key)
            .chain(keyring.subkeys.iter().map(|s| &s.public_key))
            .find(|k| k.fingerprint == issuer);

        let Some(key) = key else {
            return Ok(SignedMessage {
                literal_data: literal,
                hash,
                signed_by: None,
                signature_error: None,
            });
        };

        let raw: [u8; 64] = hex::decode(&msg.sig)
            .context("mock engine: bad signature hex")?
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("mock engine: signature must be 64 bytes"))?;
        let signature_error = verifying_key(&key.material)?
            .verify(&signed_bytes(msg.hash, &literal), &EdSignature::from_bytes(&raw))
            .err()
            .map(|e| format!("openpgp: invalid signature: {}", e));

        Ok(SignedMessage {
            literal_data: literal,
            hash,
            signed_by: Some(issuer),
            signature_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let sealed = seal(&[5u8; 32], b"pw", [1u8; 16]);
        assert_eq!(unseal(&sealed, b"pw").unwrap(), vec![5u8; 32]);
        let err = unseal(&sealed, b"wrong").unwrap_err();
        assert!(crate::crypto::pgp::engine::is_checksum_failure(&err));
    }
}
