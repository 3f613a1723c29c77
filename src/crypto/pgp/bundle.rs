//! The application-facing PGP key object.
//!
//! A [`KeyBundle`] owns one decoded [`Entity`] and layers the platform's
//! view on top of it: the KID, the canonical armored text, descriptions,
//! secret-key checks and the passphrase unlock.

use crate::core::db::{DbKey, LocalDb, ObjType};
use crate::crypto::generic::GenericKey;
use crate::crypto::gpg::GpgKey;
use crate::crypto::passphrase::SecurePassphrase;
use crate::crypto::pgp::armor;
use crate::crypto::pgp::engine::{is_checksum_failure, PgpEngine};
use crate::crypto::pgp::entity::{Entity, PrivateKey, SignatureType};
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use crate::crypto::pgp::keypair::PgpKeyManager;
use crate::crypto::pgp::warnings::{HashSecurityWarning, HashSecurityWarningType, HashSecurityWarnings};
use crate::crypto::unlock::{KeyUnlocker, PassphraseType, SecretUi, UnlockState};
use crate::error::{PgpError, Result};
use crate::types::{AlgoType, BinaryKid, RawPrivateKey, RawPublicKey};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Serialized primary key packets at or above this length carry a two-octet
/// body length, so their header is one byte longer.
const LONG_HEADER_THRESHOLD: usize = 193;
const SHORT_HEADER_LEN: usize = 8;
const LONG_HEADER_LEN: usize = 9;

/// Number of leading bytes to skip in a serialized primary key packet
/// before hashing it into a KID.
pub fn kid_header_len(serialized_len: usize) -> usize {
    if serialized_len >= LONG_HEADER_THRESHOLD {
        LONG_HEADER_LEN
    } else {
        SHORT_HEADER_LEN
    }
}

/// Derive the binary KID of a primary key from its serialized packet.
pub fn binary_kid_from_packet(algo: u8, packet: &[u8]) -> Result<BinaryKid> {
    let skip = kid_header_len(packet.len());
    if packet.len() <= skip {
        return Err(PgpError::BadKey(format!(
            "serialized primary key too short ({} bytes)",
            packet.len()
        )));
    }
    let digest = Sha256::digest(&packet[skip..]);
    Ok(BinaryKid::new(algo, &digest))
}

/// How an independent copy of a bundle was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyProvenance {
    /// Decoded afresh from the canonical armored text.
    Reparsed,
    /// Field-by-field clone of the in-memory entity.
    Cloned,
}

/// Result of [`KeyBundle::strip_revocations`].
#[derive(Debug)]
pub struct StrippedKey {
    pub bundle: KeyBundle,
    pub provenance: CopyProvenance,
}

/// One user id of a key, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PgpIdentity {
    pub username: String,
    pub comment: String,
    pub email: String,
}

/// Validated PGP key with its platform identity.
pub struct KeyBundle {
    manager: Arc<PgpKeyManager>,
    entity: Entity,
    armored_public: OnceCell<String>,
    kid: OnceCell<BinaryKid>,
    gpg_fallback: Option<Arc<dyn GenericKey>>,
    generated: bool,
}

impl KeyBundle {
    pub(crate) fn new(manager: Arc<PgpKeyManager>, entity: Entity) -> Self {
        Self {
            manager,
            entity,
            armored_public: OnceCell::new(),
            kid: OnceCell::new(),
            gpg_fallback: None,
            generated: false,
        }
    }

    pub(crate) fn new_generated(manager: Arc<PgpKeyManager>, entity: Entity) -> Self {
        let mut bundle = Self::new(manager, entity);
        bundle.generated = true;
        bundle
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub(crate) fn into_entity(self) -> Entity {
        self.entity
    }

    pub(crate) fn manager(&self) -> &Arc<PgpKeyManager> {
        &self.manager
    }

    pub(crate) fn engine(&self) -> &dyn PgpEngine {
        self.manager.engine()
    }

    /// Whether this platform generated the key (as opposed to importing it).
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Remember `text` as the canonical armored public form. Only the first
    /// call has any effect.
    pub(crate) fn set_armored_public(&self, text: String) {
        if self.armored_public.set(text).is_err() {
            log::debug!("Armored public key already cached for {}", self.fingerprint().to_key_id());
        }
    }

    /// The cached canonical armored text, if any.
    pub fn armored_public(&self) -> Option<&str> {
        self.armored_public.get().map(String::as_str)
    }

    pub fn fingerprint(&self) -> PgpFingerprint {
        self.entity.fingerprint()
    }

    pub fn same_primary_as(&self, other: &KeyBundle) -> bool {
        self.fingerprint() == other.fingerprint()
    }

    /// Require that this key has fingerprint `expected`.
    pub fn check_fingerprint(&self, expected: Option<&PgpFingerprint>) -> Result<()> {
        check_fingerprint(Some(self), expected)
    }

    pub fn algo_type(&self) -> AlgoType {
        AlgoType::from_byte(self.entity.primary_key.algorithm.as_byte())
    }

    /// `{0x01}{algo}{sha256(primary key packet body)}{0x0a}`, computed once.
    pub fn binary_kid(&self) -> Result<BinaryKid> {
        self.kid
            .get_or_try_init(|| {
                let packet = self
                    .engine()
                    .serialize_public_key(&self.entity.primary_key)
                    .map_err(PgpError::Engine)?;
                binary_kid_from_packet(self.entity.primary_key.algorithm.as_byte(), &packet)
            })
            .cloned()
    }

    /// The user id shown for this key: the primary-flagged identity if any,
    /// otherwise the first one.
    pub fn primary_uid(&self) -> String {
        let ids = &self.entity.identities;
        let chosen = ids
            .iter()
            .find(|id| id.self_signature.as_ref().map_or(false, |s| s.marks_primary()))
            .or_else(|| ids.first());

        match chosen {
            Some(id) => match &id.user_id {
                Some(uid) => uid.id.clone(),
                None => id.name.clone(),
            },
            None => String::new(),
        }
    }

    pub fn users_description(&self) -> Vec<String> {
        let uid = self.primary_uid();
        if uid.is_empty() {
            Vec::new()
        } else {
            vec![format!("user: {}", uid)]
        }
    }

    /// `(algorithm, key id, creation date)` of the primary key.
    pub fn key_info(&self) -> (String, String, String) {
        let pk = &self.entity.primary_key;
        let algorithm = format!("{}-bit {} key", pk.bit_length, pk.algorithm.family_name());
        let created = pk.created_at.format("%Y-%m-%d").to_string();
        (algorithm, pk.key_id_string(), created)
    }

    pub fn key_description(&self) -> String {
        let (algorithm, key_id, created) = self.key_info();
        format!("{}, ID {}, created {}", algorithm, key_id, created)
    }

    pub fn verbose_description(&self) -> String {
        let mut lines = self.users_description();
        lines.push(self.key_description());
        lines.join("\n")
    }

    pub fn human_description(&self) -> String {
        format!("PGP key {} {}", self.primary_uid(), self.fingerprint().to_key_id())
    }

    /// Report the first identity self-signed with a weak digest.
    pub fn security_warnings(&self, kind: HashSecurityWarningType) -> HashSecurityWarnings {
        let fingerprint = self.fingerprint();
        self.entity
            .identities
            .iter()
            .filter_map(|id| id.self_signature.as_ref())
            .find(|sig| !sig.hash.is_secure())
            .map(|sig| vec![HashSecurityWarning::new(kind, sig.hash, Some(fingerprint))])
            .unwrap_or_default()
    }

    /// An independent copy with key revocations, revoked subkeys and
    /// subkeys lacking a binding signature removed.
    pub fn strip_revocations(&self) -> StrippedKey {
        let reparsed = self
            .armored_public()
            .and_then(|text| match self.manager.read_one_key_from_string(text) {
                Ok((bundle, _)) => Some(bundle.into_entity()),
                Err(e) => {
                    log::warn!("Could not re-read cached key text, cloning instead: {}", e);
                    None
                }
            });

        let (mut entity, provenance) = match reparsed {
            Some(entity) => (entity, CopyProvenance::Reparsed),
            None => (self.entity.clone(), CopyProvenance::Cloned),
        };

        entity.revocations.clear();
        let before = entity.subkeys.len();
        entity
            .subkeys
            .retain(|s| s.sig.sig_type == SignatureType::SubkeyBinding && s.revocation.is_none());
        log::debug!(
            "Stripped revocations from {}: kept {}/{} subkeys",
            self.fingerprint().to_key_id(),
            entity.subkeys.len(),
            before
        );

        StrippedKey {
            bundle: KeyBundle::new(Arc::clone(&self.manager), entity),
            provenance,
        }
    }

    pub fn has_secret_key(&self) -> bool {
        self.entity.private_key.is_some()
    }

    /// Whether real (non-stub) secret material is present on the primary
    /// key or any subkey.
    pub fn find_pgp_private_key(&self) -> bool {
        let primary = self
            .entity
            .private_key
            .as_ref()
            .map_or(false, |k| !k.is_stub());
        primary
            || self
                .entity
                .subkeys
                .iter()
                .any(|s| s.private_key.as_ref().map_or(false, |k| k.has_material()))
    }

    /// Succeeds only when this bundle can actually produce signatures.
    pub fn check_secret_key(&self) -> Result<()> {
        let private = self.entity.private_key.as_ref().ok_or(PgpError::NoSecretKey)?;
        if private.encrypted {
            return Err(PgpError::BadKey("PGP key material should be unencrypted".to_string()));
        }
        if !self.find_pgp_private_key() && self.gpg_fallback.is_none() {
            return Err(PgpError::BadKey("no private key material or GPGKey".to_string()));
        }
        Ok(())
    }

    pub fn can_sign(&self) -> bool {
        self.entity.private_key.as_ref().map_or(false, |k| !k.encrypted) || self.gpg_fallback.is_some()
    }

    pub fn lock_state(&self) -> UnlockState {
        if self.entity.is_any_key_encrypted() {
            UnlockState::Locked
        } else {
            UnlockState::Unlocked
        }
    }

    /// Canonical armored public text, computed and cached on first use.
    pub fn encode(&self) -> Result<&str> {
        self.armored_public
            .get_or_try_init(|| self.encode_to_string(false))
            .map(String::as_str)
    }

    /// Armor the public or private serialization. Never touches the cache.
    pub fn encode_to_string(&self, private: bool) -> Result<String> {
        let raw = if private {
            self.serialize_private()?
        } else {
            self.engine()
                .serialize_entity(&self.entity)
                .map_err(PgpError::Engine)?
        };
        armor::raw_to_armored(&raw, private, &self.manager.config().armor_headers)
    }

    /// Serialize with private keys; imported keys keep their existing
    /// self-signatures.
    pub fn serialize_private(&self) -> Result<Vec<u8>> {
        self.engine()
            .serialize_private(&self.entity, !self.generated)
            .map_err(PgpError::Engine)
    }

    /// SHA-256 hex of the trimmed canonical armored text.
    pub fn full_hash(&self) -> Result<String> {
        let blob = self.encode()?;
        Ok(hex::encode(Sha256::digest(blob.trim().as_bytes())))
    }

    pub fn export_public_and_private(&self) -> Result<(RawPublicKey, Option<RawPrivateKey>)> {
        let public = || {
            self.engine()
                .serialize_entity(&self.entity)
                .map(RawPublicKey)
                .map_err(PgpError::Engine)
        };
        let private = || -> Result<Option<RawPrivateKey>> {
            if !self.has_secret_key() {
                return Ok(None);
            }
            self.serialize_private().map(|b| Some(RawPrivateKey(b)))
        };

        // Generated keys are signed during private serialization, so that
        // must run first; imported keys go public first.
        if self.generated {
            let sec = private()?;
            Ok((public()?, sec))
        } else {
            let publ = public()?;
            Ok((publ, private()?))
        }
    }

    /// Persist the canonical armored text under this key's KID.
    pub fn store_to_local_db(&self, db: &dyn LocalDb) -> Result<()> {
        let armored = self.encode()?.to_string();
        let kid = self.binary_kid()?.to_kid();
        let key = DbKey::new(ObjType::PgpKey, kid.as_str());
        db.put(&key, &[], serde_json::Value::String(armored))
            .map_err(PgpError::Store)?;
        log::debug!("Stored PGP key {} in local db", kid);
        Ok(())
    }

    /// Whether some identity is `<username@{identity domain}>`.
    /// True when some identity ends in `<username@identity_domain>`, any case.
    ///
    /// The address must follow `<` directly, as in the identities the
    /// platform generates (`name <name@domain>`).
    pub fn find_platform_username(&self, username: &str) -> bool {
        let pattern = format!(
            "(?i)<{}@{}>$",
            regex::escape(username),
            regex::escape(&self.manager.config().identity_domain)
        );
        let rxx = match Regex::new(&pattern) {
            Ok(rxx) => rxx,
            Err(e) => {
                log::warn!("Bad username pattern {:?}: {}", username, e);
                return false;
            }
        };
        self.entity.identities.iter().any(|id| rxx.is_match(&id.name))
    }

    pub fn find_email(&self, email: &str) -> bool {
        self.entity
            .identities
            .iter()
            .any(|id| id.user_id.as_ref().map_or(false, |u| u.email == email))
    }

    pub fn identity_names(&self) -> Vec<String> {
        self.entity.identities.iter().map(|id| id.name.clone()).collect()
    }

    pub fn pgp_identities(&self) -> Vec<PgpIdentity> {
        self.entity
            .identities
            .iter()
            .filter_map(|id| id.user_id.as_ref())
            .map(|uid| PgpIdentity {
                username: uid.name.clone(),
                comment: uid.comment.clone(),
                email: uid.email.clone(),
            })
            .collect()
    }

    /// Look for the first identity with `email` (case-insensitive) and
    /// report its self-signature creation time and expiry, both as Unix
    /// seconds. The key lifetime counts from the self-signature. Expiry is
    /// 0 for keys that never expire; both times are -1 when nothing matched.
    pub fn check_identity(&self, email: &str) -> (bool, i64, i64) {
        let matched = self.entity.identities.iter().find(|id| {
            id.user_id
                .as_ref()
                .map_or(false, |u| u.email.eq_ignore_ascii_case(email))
        });
        let Some(id) = matched else {
            return (false, -1, -1);
        };
        match &id.self_signature {
            Some(sig) => {
                let ctime = sig.created_at.timestamp();
                let etime = sig
                    .key_lifetime_secs
                    .map_or(0, |secs| ctime + i64::from(secs));
                (true, ctime, etime)
            }
            None => (true, -1, 0),
        }
    }

    /// Encrypt every non-stub private key in place under `passphrase`.
    pub fn encrypt_private_keys(&mut self, passphrase: &SecurePassphrase) -> Result<()> {
        let manager = Arc::clone(&self.manager);
        let engine = manager.engine();

        if let Some(key) = self.entity.private_key.as_mut() {
            if key.has_material() {
                engine
                    .encrypt_private_key(key, passphrase.as_bytes())
                    .map_err(PgpError::Engine)?;
            }
        }
        for sub in &mut self.entity.subkeys {
            let Some(key) = sub.private_key.as_mut() else {
                continue;
            };
            if key.has_material() {
                engine
                    .encrypt_private_key(key, passphrase.as_bytes())
                    .map_err(PgpError::Engine)?;
            }
        }
        log::info!("Encrypted private keys of {}", self.fingerprint().to_key_id());
        Ok(())
    }

    /// Use the system gpg binary as the fallback signer for this key.
    pub fn init_gpg_key(&mut self) -> Result<()> {
        let kid = self.binary_kid()?.to_kid();
        let gpg = GpgKey::new(
            self.fingerprint(),
            kid,
            self.algo_type(),
            &self.manager.config().gpg_program,
        );
        self.set_gpg_fallback(Arc::new(gpg));
        Ok(())
    }

    pub fn set_gpg_fallback(&mut self, key: Arc<dyn GenericKey>) {
        log::debug!("Installed fallback signer for {}", self.fingerprint().to_key_id());
        self.gpg_fallback = Some(key);
    }

    pub fn gpg_fallback(&self) -> Option<&Arc<dyn GenericKey>> {
        self.gpg_fallback.as_ref()
    }

    /// Prompt through `ui` until every encrypted private key is decrypted.
    ///
    /// Keys with nothing encrypted are returned as-is without prompting.
    pub fn unlock(&mut self, reason: &str, ui: &dyn SecretUi) -> Result<&mut Self> {
        if !self.entity.is_any_key_encrypted() {
            log::debug!("Key is not encrypted, skipping unlock");
            return Ok(self);
        }

        let description = self.verbose_description();
        let tries = self.manager.config().unlock_attempts;
        let manager = Arc::clone(&self.manager);
        let entity = &mut self.entity;

        let mut unlocker =
            KeyUnlocker::new(tries, reason, &description, PassphraseType::PgpKey, false, ui);
        unlocker.run(|pw, _store| unlock_all_private_keys(manager.engine(), entity, pw.as_bytes()))?;

        log::info!("Unlocked PGP key {}", self.fingerprint().to_key_id());
        Ok(self)
    }

    /// Non-interactive single attempt with a known passphrase.
    pub fn unlock_with_passphrase(&mut self, passphrase: &SecurePassphrase) -> Result<()> {
        let manager = Arc::clone(&self.manager);
        unlock_all_private_keys(manager.engine(), &mut self.entity, passphrase.as_bytes())
    }
}

/// Fingerprint check that also covers a missing key.
pub fn check_fingerprint(key: Option<&KeyBundle>, expected: Option<&PgpFingerprint>) -> Result<()> {
    let (key, expected) = match (key, expected) {
        (Some(k), Some(e)) => (k, e),
        _ => return Err(PgpError::UnexpectedKey),
    };
    let actual = key.fingerprint();
    if actual != *expected {
        return Err(PgpError::BadFingerprint {
            expected: *expected,
            actual,
        });
    }
    Ok(())
}

/// Decrypt a copy of `key`; the original is left untouched.
fn unlock_private_key(engine: &dyn PgpEngine, key: &PrivateKey, pw: &[u8]) -> Result<PrivateKey> {
    let mut copy = key.clone();
    if !copy.encrypted {
        return Ok(copy);
    }
    engine.decrypt_private_key(&mut copy, pw).map_err(|e| {
        if is_checksum_failure(&e) {
            PgpError::BadPassphrase(e.to_string())
        } else {
            PgpError::Engine(e)
        }
    })?;
    Ok(copy)
}

/// Decrypt the primary key and every subkey with one passphrase. Nothing is
/// written back unless all of them decrypt.
fn unlock_all_private_keys(engine: &dyn PgpEngine, entity: &mut Entity, pw: &[u8]) -> Result<()> {
    let primary = entity
        .private_key
        .as_ref()
        .map(|k| unlock_private_key(engine, k, pw))
        .transpose()?;

    let subkeys = entity
        .subkeys
        .iter()
        .map(|s| {
            s.private_key
                .as_ref()
                .map(|k| unlock_private_key(engine, k, pw))
                .transpose()
        })
        .collect::<Result<Vec<_>>>()?;

    if primary.is_some() {
        entity.private_key = primary;
    }
    for (sub, key) in entity.subkeys.iter_mut().zip(subkeys) {
        if key.is_some() {
            sub.private_key = key;
        }
    }
    Ok(())
}

impl fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBundle")
            .field("fingerprint", &self.fingerprint())
            .field("generated", &self.generated)
            .field("has_secret_key", &self.has_secret_key())
            .field("subkeys", &self.entity.subkeys.len())
            .field("gpg_fallback", &self.gpg_fallback.is_some())
            .finish()
    }
}

impl fmt::Display for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_description())
    }
}
