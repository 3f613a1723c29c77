//! Builders for test keys in the mock engine's wire format
//!
//! Keys are generated fresh for every build, so two builders with the same
//! user id still produce different primary keys.

use crate::config::PgpConfig;
use crate::crypto::pgp::armor;
use crate::crypto::pgp::entity::{HashAlgorithm, PublicKeyAlgorithm, SignatureType};
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use crate::test_utils::mock_engine::{
    fingerprint_of, seal, WireEntity, WireIdentity, WireKey, WireSecret, WireSig, WireSubkey,
};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::collections::HashMap;

const KEY_BITS: u16 = 256;
const BROKEN_ALGO: u8 = 99;
const BIG_MATERIAL_LEN: usize = 256;
const TEST_SALT: [u8; 16] = [0x5a; 16];

fn fresh_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

/// Public material: the Ed25519 verifying key, padded to `len` bytes.
fn material_for(seed: &[u8; 32], len: usize) -> Vec<u8> {
    let mut material = SigningKey::from_bytes(seed).verifying_key().to_bytes().to_vec();
    material.resize(len.max(32), 0xab);
    material
}

fn wire_key(seed: &[u8; 32], created: i64, len: usize) -> WireKey {
    WireKey {
        algo: PublicKeyAlgorithm::EdDsa.as_byte(),
        created,
        bits: KEY_BITS,
        material: hex::encode(material_for(seed, len)),
    }
}

fn sig(sig_type: SignatureType, hash: HashAlgorithm, created: i64) -> WireSig {
    WireSig {
        sig_type: sig_type.as_byte(),
        hash: hash.as_byte(),
        created,
        primary: None,
        lifetime: None,
    }
}

fn secret_for(seed: &[u8; 32], passphrase: Option<&str>, corrupt: bool) -> WireSecret {
    match passphrase {
        Some(pw) => {
            let mut blob = seal(seed, pw.as_bytes(), TEST_SALT);
            if corrupt {
                blob.truncate(20);
            }
            WireSecret::Sealed {
                blob: hex::encode(blob),
            }
        }
        None => WireSecret::Plain {
            seed: hex::encode(seed),
        },
    }
}

fn good_subkey(created: i64) -> WireSubkey {
    let seed = fresh_seed();
    WireSubkey {
        key: wire_key(&seed, created, 32),
        secret: Some(secret_for(&seed, None, false)),
        sig: sig(SignatureType::SubkeyBinding, HashAlgorithm::Sha256, created),
        revocation: None,
        broken: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubkeyShape {
    Good,
    Revoked,
    NonBinding,
    Broken,
}

/// Fluent builder for a single test key.
#[derive(Debug, Clone)]
pub struct TestKeyBuilder {
    identities: Vec<(String, bool)>,
    self_sig_hash: HashAlgorithm,
    created: DateTime<Utc>,
    self_sig_created: Option<DateTime<Utc>>,
    key_lifetime: Option<u32>,
    subkeys: Vec<SubkeyShape>,
    key_revocation: bool,
    passphrase: Option<String>,
    subkey_passphrases: HashMap<usize, String>,
    big_primary: bool,
    stub_primary: bool,
    corrupt_sealed: bool,
}

impl TestKeyBuilder {
    pub fn new(user_id: &str) -> Self {
        let mut builder = Self::anonymous();
        builder.identities.push((user_id.to_string(), false));
        builder
    }

    /// A key without any user ids.
    pub fn anonymous() -> Self {
        Self {
            identities: Vec::new(),
            self_sig_hash: HashAlgorithm::Sha256,
            created: Utc
                .timestamp_opt(1_600_000_000, 0)
                .single()
                .expect("valid timestamp"),
            self_sig_created: None,
            key_lifetime: None,
            subkeys: Vec::new(),
            key_revocation: false,
            passphrase: None,
            subkey_passphrases: HashMap::new(),
            big_primary: false,
            stub_primary: false,
            corrupt_sealed: false,
        }
    }

    pub fn identity(mut self, user_id: &str) -> Self {
        self.identities.push((user_id.to_string(), false));
        self
    }

    /// Add a user id whose self-signature carries the primary flag.
    pub fn primary_identity(mut self, user_id: &str) -> Self {
        self.identities.push((user_id.to_string(), true));
        self
    }

    pub fn self_sig_hash(mut self, hash: HashAlgorithm) -> Self {
        self.self_sig_hash = hash;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created = at;
        self
    }

    /// Date the identity self-signatures at `at` instead of the key creation.
    pub fn self_sig_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.self_sig_created = Some(at);
        self
    }

    pub fn key_lifetime(mut self, secs: u32) -> Self {
        self.key_lifetime = Some(secs);
        self
    }

    pub fn subkeys(mut self, n: usize) -> Self {
        self.subkeys.extend(std::iter::repeat(SubkeyShape::Good).take(n));
        self
    }

    pub fn revoked_subkey(mut self) -> Self {
        self.subkeys.push(SubkeyShape::Revoked);
        self
    }

    /// A subkey whose signature is not a subkey binding.
    pub fn non_binding_subkey(mut self) -> Self {
        self.subkeys.push(SubkeyShape::NonBinding);
        self
    }

    /// A subkey the engine cannot decode.
    pub fn broken_subkey(mut self) -> Self {
        self.subkeys.push(SubkeyShape::Broken);
        self
    }

    pub fn key_revocation(mut self) -> Self {
        self.key_revocation = true;
        self
    }

    /// Encrypt every secret under `passphrase`.
    pub fn passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(passphrase.to_string());
        self
    }

    /// Encrypt subkey `index` under its own passphrase.
    pub fn subkey_passphrase(mut self, index: usize, passphrase: &str) -> Self {
        self.subkey_passphrases.insert(index, passphrase.to_string());
        self
    }

    /// Pad the primary material so its packet needs a two-octet length.
    pub fn big_primary(mut self) -> Self {
        self.big_primary = true;
        self
    }

    /// Export the primary secret as a stub (no material).
    pub fn stub_primary(mut self) -> Self {
        self.stub_primary = true;
        self
    }

    /// Truncate the primary's sealed secret so decryption fails outright.
    pub fn corrupt_sealed(mut self) -> Self {
        self.corrupt_sealed = true;
        self
    }

    pub fn build(self) -> TestKey {
        let created = self.created.timestamp();
        let sig_created = self.self_sig_created.map_or(created, |at| at.timestamp());
        let seed = fresh_seed();
        let len = if self.big_primary { BIG_MATERIAL_LEN } else { 32 };
        let primary = wire_key(&seed, created, len);

        let identities = self
            .identities
            .iter()
            .map(|(name, primary)| {
                let mut s = sig(SignatureType::PositiveCert, self.self_sig_hash, sig_created);
                s.primary = primary.then_some(true);
                s.lifetime = self.key_lifetime;
                WireIdentity {
                    name: name.clone(),
                    sig: Some(s),
                }
            })
            .collect();

        let revocations = if self.key_revocation {
            vec![sig(SignatureType::KeyRevocation, HashAlgorithm::Sha256, created)]
        } else {
            Vec::new()
        };

        let mut subkeys = Vec::new();
        for (i, shape) in self.subkeys.iter().enumerate() {
            let mut sub = good_subkey(created);
            let sub_seed: [u8; 32] = match &sub.secret {
                Some(WireSecret::Plain { seed }) => hex::decode(seed)
                    .expect("hex seed")
                    .try_into()
                    .expect("32-byte seed"),
                _ => unreachable!("fresh subkeys carry plain secrets"),
            };
            let pw = self
                .subkey_passphrases
                .get(&i)
                .or(self.passphrase.as_ref())
                .map(String::as_str);
            sub.secret = Some(secret_for(&sub_seed, pw, false));

            match shape {
                SubkeyShape::Good => {}
                SubkeyShape::Revoked => {
                    sub.revocation =
                        Some(sig(SignatureType::SubkeyRevocation, HashAlgorithm::Sha256, created));
                }
                SubkeyShape::NonBinding => {
                    sub.sig = sig(SignatureType::GenericCert, HashAlgorithm::Sha256, created);
                }
                SubkeyShape::Broken => {
                    sub.key.algo = BROKEN_ALGO;
                    sub.secret = None;
                    sub.broken = true;
                }
            }
            subkeys.push(sub);
        }

        let secret = if self.stub_primary {
            WireSecret::Stub
        } else {
            secret_for(&seed, self.passphrase.as_deref(), self.corrupt_sealed)
        };

        let private = WireEntity {
            primary,
            secret: Some(secret),
            identities,
            revocations,
            subkeys,
        };
        TestKey::from_private(private)
    }
}

/// A built key, available in public and private form.
#[derive(Debug, Clone)]
pub struct TestKey {
    private: WireEntity,
}

impl TestKey {
    fn from_private(private: WireEntity) -> Self {
        Self { private }
    }

    pub fn fingerprint(&self) -> PgpFingerprint {
        let key = &self.private.primary;
        let material = hex::decode(&key.material).expect("hex material");
        fingerprint_of(key.algo, key.created, &material)
    }

    pub fn private_wire(&self) -> WireEntity {
        self.private.clone()
    }

    pub fn public_wire(&self) -> WireEntity {
        let mut public = self.private.clone();
        public.secret = None;
        for sub in &mut public.subkeys {
            sub.secret = None;
        }
        public
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&vec![self.public_wire()]).expect("serialize wire entity")
    }

    pub fn private_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&vec![self.private_wire()]).expect("serialize wire entity")
    }

    pub fn armored_public(&self) -> String {
        armor_wire_entities(&[self.public_wire()], false)
    }

    pub fn armored_private(&self) -> String {
        armor_wire_entities(&[self.private_wire()], true)
    }

    /// The same primary key exported with `n` different subkeys, as a
    /// second export of one key would look.
    pub fn with_extra_subkeys(&self, n: usize) -> TestKey {
        let mut private = self.private.clone();
        let created = private.primary.created;
        private.subkeys = (0..n).map(|_| good_subkey(created)).collect();
        TestKey::from_private(private)
    }
}

/// Armor a list of wire entities as one key block.
pub fn armor_wire_entities(entities: &[WireEntity], private: bool) -> String {
    let raw = serde_json::to_vec(entities).expect("serialize wire entities");
    armor::raw_to_armored(&raw, private, &PgpConfig::default().armor_headers).expect("armor wire entities")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_are_unique() {
        let a = TestKeyBuilder::new("same").build();
        let b = TestKeyBuilder::new("same").build();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_public_wire_has_no_secrets() {
        let key = TestKeyBuilder::new("x").subkeys(2).build();
        let public = key.public_wire();
        assert!(public.secret.is_none());
        assert!(public.subkeys.iter().all(|s| s.secret.is_none()));
        assert_eq!(key.with_extra_subkeys(3).fingerprint(), key.fingerprint());
    }
}
