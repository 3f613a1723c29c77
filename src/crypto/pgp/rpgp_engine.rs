//! OpenPGP engine backed by rPGP.
//!
//! Key rings decode into rPGP's signed key types. Every decoded component
//! keeps its rPGP value in a [`NativeHandle`], so serialization, unlocking
//! and signing go back through rPGP rather than through the flattened view.

use crate::crypto::pgp::engine::{
    new_format_packet, v4_public_key_packet, PgpEngine, PrivateKeyChecksumError, SignedMessage,
    LITERAL_DATA_TAG, PUBLIC_KEY_TAG,
};
use crate::crypto::pgp::entity::{
    BadSubkey, Entity, HashAlgorithm, Identity, NativeHandle, PrivateKey, PublicKey,
    PublicKeyAlgorithm, Signature, SignatureType, Subkey,
};
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use pgp::composed::{
    Deserializable, SignedPublicKey, SignedPublicSubKey, SignedSecretKey, SignedSecretSubKey,
    StandaloneSignature,
};
use pgp::packet::{self, SignatureConfig, Subpacket, SubpacketData};
use pgp::ser::Serialize;
use pgp::types::{KeyDetails, Password, SecretKeyTrait, SignedUser};
use rand::thread_rng;
use std::time::SystemTime;
use zeroize::Zeroizing;

const SIGNATURE_TAG: u8 = 2;
const SECRET_KEY_TAG: u8 = 5;

/// S2K usage octets that are followed by an S2K specifier.
const S2K_USAGE_CHECKSUM: u8 = 254;
const S2K_USAGE_SHA1: u8 = 255;
/// GnuPG's private S2K type for secret keys exported without material.
const GNU_DUMMY_S2K: u8 = 101;

const OID_ED25519: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0xda, 0x47, 0x0f, 0x01];
const OID_CURVE25519: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x97, 0x55, 0x01, 0x05, 0x01];
const OID_P256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const OID_P384: &[u8] = &[0x2b, 0x81, 0x04, 0x00, 0x22];
const OID_P521: &[u8] = &[0x2b, 0x81, 0x04, 0x00, 0x23];

/// [`PgpEngine`] over rPGP's composed key types.
#[derive(Debug, Default, Clone, Copy)]
pub struct RpgpEngine;

impl RpgpEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Secret packet held by a [`PrivateKey`] in its current lock state.
enum SecretPacket {
    Primary(packet::SecretKey),
    Subkey(packet::SecretSubkey),
}

impl SecretPacket {
    /// Serialized packet body: public fields followed by the secret ones.
    fn body(&self) -> Result<Vec<u8>> {
        let body = match self {
            Self::Primary(key) => key.to_bytes()?,
            Self::Subkey(key) => key.to_bytes()?,
        };
        Ok(body)
    }

    fn unlocked(&self, password: &Password) -> Result<Self> {
        let unlocked = match self {
            Self::Primary(key) => {
                let mut key = key.clone();
                key.remove_password(password).map_err(checksum_failure)?;
                Self::Primary(key)
            }
            Self::Subkey(key) => {
                let mut key = key.clone();
                key.remove_password(password).map_err(checksum_failure)?;
                Self::Subkey(key)
            }
        };
        Ok(unlocked)
    }

    fn locked(&self, password: &Password) -> Result<Self> {
        let locked = match self {
            Self::Primary(key) => {
                let mut key = key.clone();
                key.set_password(thread_rng(), password)?;
                Self::Primary(key)
            }
            Self::Subkey(key) => {
                let mut key = key.clone();
                key.set_password(thread_rng(), password)?;
                Self::Subkey(key)
            }
        };
        Ok(locked)
    }
}

/// rPGP reports a wrong passphrase in several ways (bad checksum, bad
/// padding, bad key parameters); all of them count as a checksum failure.
fn checksum_failure(err: pgp::errors::Error) -> anyhow::Error {
    log::debug!("rPGP refused the passphrase: {}", err);
    anyhow::Error::new(PrivateKeyChecksumError)
}

fn password(passphrase: &[u8]) -> Password {
    let text = String::from_utf8_lossy(passphrase);
    Password::from(&*text)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("rpgp engine: timestamp {} out of range", secs))
}

/// Tag, header length and body length of the packet that starts `data`.
fn packet_header(data: &[u8]) -> Result<Option<(u8, usize, usize)>> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };
    if first & 0x80 == 0 {
        bail!("rpgp engine: not an OpenPGP packet (first octet {:#04x})", first);
    }
    let byte = |i: usize| {
        data.get(i)
            .copied()
            .map(usize::from)
            .ok_or_else(|| anyhow!("rpgp engine: truncated packet header"))
    };

    let header = if first & 0x40 != 0 {
        let tag = first & 0x3f;
        match byte(1)? {
            len @ 0..=191 => (tag, 2, len),
            len @ 192..=223 => (tag, 3, ((len - 192) << 8) + byte(2)? + 192),
            255 => (tag, 6, (byte(2)? << 24) | (byte(3)? << 16) | (byte(4)? << 8) | byte(5)?),
            _ => bail!("rpgp engine: partial body lengths are not supported"),
        }
    } else {
        let tag = (first >> 2) & 0x0f;
        match first & 0x03 {
            0 => (tag, 2, byte(1)?),
            1 => (tag, 3, (byte(1)? << 8) | byte(2)?),
            2 => (tag, 5, (byte(1)? << 24) | (byte(2)? << 16) | (byte(3)? << 8) | byte(4)?),
            _ => (tag, 1, data.len() - 1),
        }
    };
    Ok(Some(header))
}

/// Key size in bits: the modulus or prime for RSA/DSA/Elgamal, the curve
/// size for ECC keys.
fn bit_length(algo: PublicKeyAlgorithm, material: &[u8]) -> u16 {
    match algo {
        PublicKeyAlgorithm::Ecdh | PublicKeyAlgorithm::Ecdsa | PublicKeyAlgorithm::EdDsa => {
            let oid = material
                .first()
                .and_then(|&len| material.get(1..1 + usize::from(len)))
                .unwrap_or_default();
            match oid {
                OID_ED25519 | OID_CURVE25519 | OID_P256 => 256,
                OID_P384 => 384,
                OID_P521 => 521,
                _ => 0,
            }
        }
        _ => material
            .get(..2)
            .map_or(0, |bits| u16::from_be_bytes([bits[0], bits[1]])),
    }
}

/// Flattened view of a serialized v4 public key body.
fn public_key_view(body: &[u8], fingerprint: &[u8]) -> Result<PublicKey> {
    if body.len() < 7 || body[0] != 4 {
        bail!("rpgp engine: only v4 keys are supported");
    }
    let created = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
    let algorithm = PublicKeyAlgorithm::from_byte(body[5]);
    let material = body[6..].to_vec();
    let fingerprint = PgpFingerprint::from_slice(fingerprint)?;
    let mut key_id = [0u8; 8];
    key_id.copy_from_slice(&fingerprint.as_bytes()[12..]);

    Ok(PublicKey {
        algorithm,
        fingerprint,
        key_id: u64::from_be_bytes(key_id),
        created_at: timestamp(i64::from(created))?,
        bit_length: bit_length(algorithm, &material),
        material,
    })
}

/// Signature type, hash and (v3 only) creation time from a signature body.
fn signature_fields(body: &[u8]) -> Result<(u8, u8, Option<u32>)> {
    match body.first() {
        Some(3) if body.len() >= 17 => Ok((
            body[2],
            body[16],
            Some(u32::from_be_bytes([body[3], body[4], body[5], body[6]])),
        )),
        Some(4) if body.len() >= 4 => Ok((body[1], body[3], None)),
        _ => bail!("rpgp engine: unsupported signature packet"),
    }
}

fn creation_time(sig: &packet::Signature) -> Option<DateTime<Utc>> {
    sig.config().and_then(|config| {
        config.hashed_subpackets.iter().find_map(|p| match &p.data {
            SubpacketData::SignatureCreationTime(created) => Some(*created),
            _ => None,
        })
    })
}

/// Whether `sig` names `key` as its issuer.
fn issued_by(sig: &packet::Signature, key: &impl KeyDetails) -> bool {
    let Some(config) = sig.config() else {
        return false;
    };
    config
        .hashed_subpackets
        .iter()
        .chain(config.unhashed_subpackets.iter())
        .any(|p| match &p.data {
            SubpacketData::IssuerFingerprint(fp) => *fp == key.fingerprint(),
            SubpacketData::Issuer(id) => *id == key.key_id(),
            _ => false,
        })
}

fn signature_view(sig: &packet::Signature) -> Result<Signature> {
    let body = sig.to_bytes().context("rpgp engine: cannot serialize signature")?;
    let (sig_type, hash, v3_created) = signature_fields(&body)?;
    let created_at = match v3_created {
        Some(secs) => timestamp(i64::from(secs))?,
        None => creation_time(sig)
            .ok_or_else(|| anyhow!("rpgp engine: signature without a creation time"))?,
    };

    let mut view = Signature::new(
        SignatureType::from_byte(sig_type),
        HashAlgorithm::from_byte(hash),
        created_at,
    );
    view.is_primary_id = sig.is_primary().then_some(true);
    view.key_lifetime_secs = sig
        .key_expiration_time()
        .map(|lifetime| u32::try_from(lifetime.num_seconds()).unwrap_or(u32::MAX));
    view.native = Some(NativeHandle::new(sig.clone()));
    Ok(view)
}

fn identity_view(user: &SignedUser, primary: &packet::PublicKey) -> Result<Identity> {
    let name = String::from_utf8_lossy(user.id.id()).to_string();
    let self_signature = user
        .signatures
        .iter()
        .filter(|sig| issued_by(sig, primary))
        .max_by_key(|sig| creation_time(sig))
        .or_else(|| user.signatures.first())
        .map(signature_view)
        .transpose()?;

    let mut identity = Identity::new(&name, self_signature);
    identity.native = Some(NativeHandle::new(user.clone()));
    Ok(identity)
}

/// Private view of a secret packet whose public fields take `public_len`
/// bytes of its body.
fn secret_view(secret: SecretPacket, public_len: usize) -> Result<PrivateKey> {
    let body = secret.body()?;
    let usage = *body
        .get(public_len)
        .ok_or_else(|| anyhow!("rpgp engine: truncated secret key"))?;
    let is_stub = matches!(usage, S2K_USAGE_CHECKSUM | S2K_USAGE_SHA1)
        && body.get(public_len + 2) == Some(&GNU_DUMMY_S2K);

    let key = if is_stub {
        PrivateKey::stub()
    } else if usage == 0 {
        PrivateKey::decrypted(body)
    } else {
        PrivateKey::encrypted(body)
    };
    Ok(key.with_native(NativeHandle::new(secret)))
}

fn subkey_view(
    sub: &SignedPublicSubKey,
    primary: &packet::PublicKey,
    secret: Option<&packet::SecretSubkey>,
) -> Result<Subkey> {
    sub.verify(primary).context("invalid subkey binding")?;

    let body = sub.key.to_bytes()?;
    let public_key = public_key_view(&body, sub.key.fingerprint().as_bytes())?;
    let sigs = sub
        .signatures
        .iter()
        .map(signature_view)
        .collect::<Result<Vec<_>>>()?;
    let (revocations, bindings): (Vec<_>, Vec<_>) = sigs
        .into_iter()
        .partition(|sig| sig.sig_type == SignatureType::SubkeyRevocation);
    let sig = bindings
        .into_iter()
        .max_by_key(|sig| sig.created_at)
        .ok_or_else(|| anyhow!("subkey has no binding signature"))?;
    let private_key = secret
        .map(|key| secret_view(SecretPacket::Subkey(key.clone()), body.len()))
        .transpose()?;

    Ok(Subkey {
        public_key,
        private_key,
        sig,
        revocation: revocations.into_iter().next(),
        native: Some(NativeHandle::new(sub.clone())),
    })
}

/// Flatten a transferable public key, pairing in the secret halves when the
/// key came from a secret key ring.
fn entity_from(public: SignedPublicKey, secret: Option<&SignedSecretKey>) -> Result<Entity> {
    let primary = &public.primary_key;
    let primary_body = primary.to_bytes()?;
    let primary_key = public_key_view(&primary_body, primary.fingerprint().as_bytes())?;
    let private_key = secret
        .map(|key| {
            secret_view(
                SecretPacket::Primary(key.primary_key.clone()),
                primary_body.len(),
            )
        })
        .transpose()?;

    let identities = public
        .details
        .users
        .iter()
        .map(|user| identity_view(user, primary))
        .collect::<Result<Vec<_>>>()?;
    let revocations = public
        .details
        .revocation_signatures
        .iter()
        .map(signature_view)
        .collect::<Result<Vec<_>>>()?;

    let mut subkeys = Vec::new();
    let mut bad_subkeys = Vec::new();
    for sub in &public.public_subkeys {
        let fingerprint = sub.key.fingerprint();
        let secret_sub = secret
            .and_then(|key| {
                key.secret_subkeys
                    .iter()
                    .find(|s| s.key.fingerprint() == fingerprint)
            })
            .map(|s| &s.key);
        match subkey_view(sub, primary, secret_sub) {
            Ok(subkey) => subkeys.push(subkey),
            Err(e) => {
                log::warn!("Skipping subkey {}: {:#}", hex::encode(fingerprint.as_bytes()), e);
                bad_subkeys.push(BadSubkey {
                    error: format!("{:#}", e),
                });
            }
        }
    }

    Ok(Entity {
        primary_key,
        private_key,
        identities,
        revocations,
        subkeys,
        bad_subkeys,
        native: Some(NativeHandle::new(public)),
    })
}

fn native_key(entity: &Entity) -> Result<&SignedPublicKey> {
    entity
        .native
        .as_ref()
        .and_then(|n| n.downcast_ref::<SignedPublicKey>())
        .ok_or_else(|| anyhow!("rpgp engine: entity was not decoded by rPGP"))
}

fn native_secret(key: &PrivateKey) -> Result<&SecretPacket> {
    key.native
        .as_ref()
        .and_then(|n| n.downcast_ref::<SecretPacket>())
        .ok_or_else(|| anyhow!("rpgp engine: private key was not decoded by rPGP"))
}

fn native_users(entity: &Entity) -> Result<Vec<SignedUser>> {
    entity
        .identities
        .iter()
        .map(|identity| {
            identity
                .native
                .as_ref()
                .and_then(|n| n.downcast_ref::<SignedUser>())
                .cloned()
                .ok_or_else(|| anyhow!("rpgp engine: identity {:?} has no rPGP user", identity.name))
        })
        .collect()
}

fn native_signature(sig: &Signature) -> Result<packet::Signature> {
    sig.native
        .as_ref()
        .and_then(|n| n.downcast_ref::<packet::Signature>())
        .cloned()
        .ok_or_else(|| anyhow!("rpgp engine: signature has no rPGP packet"))
}

fn native_subkey(sub: &Subkey) -> Result<SignedPublicSubKey> {
    sub.native
        .as_ref()
        .and_then(|n| n.downcast_ref::<SignedPublicSubKey>())
        .cloned()
        .ok_or_else(|| anyhow!("rpgp engine: subkey has no rPGP key"))
}

/// The first decrypted secret able to sign: the primary, else a subkey.
fn signing_secret(signer: &Entity) -> Result<&SecretPacket> {
    std::iter::once(signer.private_key.as_ref())
        .chain(signer.subkeys.iter().map(|sub| sub.private_key.as_ref()))
        .flatten()
        .filter(|key| key.has_material())
        .find_map(|key| native_secret(key).ok())
        .ok_or_else(|| anyhow!("rpgp engine: no decrypted signing key"))
}

/// Detached binary signature over `data`, carrying issuer subpackets.
fn binary_signature<K>(key: &K, data: &[u8]) -> Result<packet::Signature>
where
    K: SecretKeyTrait + KeyDetails,
{
    let mut config = SignatureConfig::from_key(thread_rng(), key, packet::SignatureType::Binary)?;
    config.hashed_subpackets = vec![
        Subpacket::regular(SubpacketData::IssuerFingerprint(key.fingerprint()))?,
        Subpacket::critical(SubpacketData::SignatureCreationTime(SystemTime::now().into()))?,
    ];
    config.unhashed_subpackets = vec![Subpacket::regular(SubpacketData::Issuer(key.key_id()))?];
    Ok(config.sign(key, &Password::from(""), data)?)
}

/// Literal data packet body: binary format, no file name, no date.
fn literal_body(message: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(message.len() + 6);
    body.extend_from_slice(&[b'b', 0, 0, 0, 0, 0]);
    body.extend_from_slice(message);
    body
}

fn literal_content(body: &[u8]) -> Result<&[u8]> {
    let name_len = usize::from(
        *body
            .get(1)
            .ok_or_else(|| anyhow!("rpgp engine: truncated literal data"))?,
    );
    body.get(2 + name_len + 4..)
        .ok_or_else(|| anyhow!("rpgp engine: truncated literal data"))
}

/// Split `data` into its first packet (header included) and the rest.
fn split_packet(data: &[u8], expected_tag: u8) -> Result<(&[u8], usize, &[u8])> {
    let (tag, header_len, body_len) =
        packet_header(data)?.ok_or_else(|| anyhow!("rpgp engine: unexpected end of message"))?;
    if tag != expected_tag {
        bail!("rpgp engine: expected packet tag {}, found {}", expected_tag, tag);
    }
    let end = header_len + body_len;
    if data.len() < end {
        bail!("rpgp engine: truncated packet");
    }
    Ok((&data[..end], header_len, &data[end..]))
}

impl PgpEngine for RpgpEngine {
    fn read_key_ring(&self, data: &[u8]) -> Result<Vec<Entity>> {
        let Some((tag, _, _)) = packet_header(data)? else {
            return Ok(Vec::new());
        };
        match tag {
            SECRET_KEY_TAG => SignedSecretKey::from_bytes_many(data)?
                .map(|key| {
                    let key = key?;
                    entity_from(SignedPublicKey::from(key.clone()), Some(&key))
                })
                .collect(),
            PUBLIC_KEY_TAG => SignedPublicKey::from_bytes_many(data)?
                .map(|key| entity_from(key?, None))
                .collect(),
            other => bail!("rpgp engine: expected a key packet, found tag {}", other),
        }
    }

    fn serialize_public_key(&self, key: &PublicKey) -> Result<Vec<u8>> {
        Ok(v4_public_key_packet(
            key.algorithm.as_byte(),
            key.created_at.timestamp(),
            &key.material,
        ))
    }

    fn serialize_entity(&self, entity: &Entity) -> Result<Vec<u8>> {
        let mut key = native_key(entity)?.clone();
        key.details.users = native_users(entity)?;
        key.details.revocation_signatures = entity
            .revocations
            .iter()
            .map(native_signature)
            .collect::<Result<Vec<_>>>()?;
        key.public_subkeys = entity
            .subkeys
            .iter()
            .map(native_subkey)
            .collect::<Result<Vec<_>>>()?;
        Ok(key.to_bytes()?)
    }

    fn serialize_private(&self, entity: &Entity, reuse_signatures: bool) -> Result<Vec<u8>> {
        if !reuse_signatures {
            log::debug!("rpgp engine keeps the existing self-signatures when exporting");
        }
        let shell = native_key(entity)?;
        let primary = match entity.private_key.as_ref().map(native_secret).transpose()? {
            Some(SecretPacket::Primary(key)) => key.clone(),
            _ => bail!("rpgp engine: entity has no primary secret key"),
        };

        let mut public_subkeys = Vec::new();
        let mut secret_subkeys = Vec::new();
        for sub in &entity.subkeys {
            let public = native_subkey(sub)?;
            match sub.private_key.as_ref().map(native_secret).transpose()? {
                Some(SecretPacket::Subkey(key)) => {
                    secret_subkeys.push(SignedSecretSubKey::new(key.clone(), public.signatures))
                }
                _ => public_subkeys.push(public),
            }
        }

        let mut details = shell.details.clone();
        details.users = native_users(entity)?;
        details.revocation_signatures = entity
            .revocations
            .iter()
            .map(native_signature)
            .collect::<Result<Vec<_>>>()?;
        let key = SignedSecretKey::new(primary, details, public_subkeys, secret_subkeys);
        Ok(key.to_bytes()?)
    }

    fn decrypt_private_key(&self, key: &mut PrivateKey, passphrase: &[u8]) -> Result<()> {
        if !key.encrypted {
            return Ok(());
        }
        let unlocked = native_secret(key)?.unlocked(&password(passphrase))?;
        key.material = Some(Zeroizing::new(unlocked.body()?));
        key.sealed = None;
        key.encrypted = false;
        key.native = Some(NativeHandle::new(unlocked));
        Ok(())
    }

    fn encrypt_private_key(&self, key: &mut PrivateKey, passphrase: &[u8]) -> Result<()> {
        if !key.has_material() {
            bail!("rpgp engine: no decrypted material to encrypt");
        }
        let locked = native_secret(key)?.locked(&password(passphrase))?;
        key.sealed = Some(locked.body()?);
        key.material = None;
        key.encrypted = true;
        key.native = Some(NativeHandle::new(locked));
        Ok(())
    }

    fn sign_message(&self, signer: &Entity, message: &[u8]) -> Result<Vec<u8>> {
        let signature = match signing_secret(signer)? {
            SecretPacket::Primary(key) => binary_signature(key, message)?,
            SecretPacket::Subkey(key) => binary_signature(key, message)?,
        };
        let mut out = StandaloneSignature::new(signature).to_bytes()?;
        out.extend(new_format_packet(LITERAL_DATA_TAG, &literal_body(message)));
        Ok(out)
    }

    fn read_signed_message(&self, data: &[u8], keyring: &Entity) -> Result<SignedMessage> {
        let (sig_packet, sig_header_len, rest) = split_packet(data, SIGNATURE_TAG)?;
        let (literal_packet, literal_header_len, _) = split_packet(rest, LITERAL_DATA_TAG)?;
        let literal = literal_content(&literal_packet[literal_header_len..])?;
        let (_, hash, _) = signature_fields(&sig_packet[sig_header_len..])?;
        let standalone =
            StandaloneSignature::from_bytes(sig_packet).context("rpgp engine: bad signature packet")?;

        let key = native_key(keyring)?;
        let outcome = if issued_by(&standalone.signature, &key.primary_key) {
            Some((
                keyring.fingerprint(),
                standalone.verify(&key.primary_key, literal).err(),
            ))
        } else {
            keyring.subkeys.iter().find_map(|sub| {
                let native = sub.native.as_ref()?.downcast_ref::<SignedPublicSubKey>()?;
                issued_by(&standalone.signature, &native.key).then(|| {
                    (
                        sub.public_key.fingerprint,
                        standalone.verify(&native.key, literal).err(),
                    )
                })
            })
        };

        let (signed_by, signature_error) = match outcome {
            Some((fingerprint, error)) => (
                Some(fingerprint),
                error.map(|e| format!("openpgp: invalid signature: {}", e)),
            ),
            None => (None, None),
        };
        Ok(SignedMessage {
            literal_data: literal.to_vec(),
            hash: HashAlgorithm::from_byte(hash),
            signed_by,
            signature_error,
        })
    }
}
