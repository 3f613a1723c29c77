//! Decoded OpenPGP entity model.
//!
//! This is the shape the OpenPGP engine hands back after decoding a key ring:
//! a primary key with optional private material, its identities, key
//! revocations and subkeys. Nothing here parses packets; the engine fills
//! these structs in and the key bundle reasons about them.

use crate::crypto::pgp::fingerprint::PgpFingerprint;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// OpenPGP public-key algorithm identifiers (RFC 4880 §9.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyAlgorithm {
    Rsa,
    RsaEncryptOnly,
    RsaSignOnly,
    Elgamal,
    Dsa,
    Ecdh,
    Ecdsa,
    EdDsa,
    Other(u8),
}

impl PublicKeyAlgorithm {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Rsa,
            2 => Self::RsaEncryptOnly,
            3 => Self::RsaSignOnly,
            16 => Self::Elgamal,
            17 => Self::Dsa,
            18 => Self::Ecdh,
            19 => Self::Ecdsa,
            22 => Self::EdDsa,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Rsa => 1,
            Self::RsaEncryptOnly => 2,
            Self::RsaSignOnly => 3,
            Self::Elgamal => 16,
            Self::Dsa => 17,
            Self::Ecdh => 18,
            Self::Ecdsa => 19,
            Self::EdDsa => 22,
            Self::Other(b) => b,
        }
    }

    /// Family name used in human-readable key descriptions.
    pub fn family_name(self) -> &'static str {
        match self {
            Self::Rsa | Self::RsaEncryptOnly | Self::RsaSignOnly => "RSA",
            Self::Dsa => "DSA",
            Self::Ecdsa => "ECDSA",
            Self::EdDsa => "EdDSA",
            _ => "<UNKNOWN TYPE>",
        }
    }
}

/// OpenPGP hash algorithm identifiers (RFC 4880 §9.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Ripemd160,
    Sha256,
    Sha384,
    Sha512,
    Sha224,
    Other(u8),
}

impl HashAlgorithm {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Md5,
            2 => Self::Sha1,
            3 => Self::Ripemd160,
            8 => Self::Sha256,
            9 => Self::Sha384,
            10 => Self::Sha512,
            11 => Self::Sha224,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Md5 => 1,
            Self::Sha1 => 2,
            Self::Ripemd160 => 3,
            Self::Sha256 => 8,
            Self::Sha384 => 9,
            Self::Sha512 => 10,
            Self::Sha224 => 11,
            Self::Other(b) => b,
        }
    }

    /// MD5, SHA-1 and RIPEMD-160 no longer count as secure for signatures.
    pub fn is_secure(self) -> bool {
        !matches!(self, Self::Md5 | Self::Sha1 | Self::Ripemd160)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("MD5"),
            Self::Sha1 => f.write_str("SHA1"),
            Self::Ripemd160 => f.write_str("RIPEMD160"),
            Self::Sha256 => f.write_str("SHA256"),
            Self::Sha384 => f.write_str("SHA384"),
            Self::Sha512 => f.write_str("SHA512"),
            Self::Sha224 => f.write_str("SHA224"),
            Self::Other(b) => write!(f, "hash#{}", b),
        }
    }
}

/// Signature types this crate cares about (RFC 4880 §5.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Binary,
    Text,
    GenericCert,
    PositiveCert,
    SubkeyBinding,
    PrimaryKeyBinding,
    DirectKey,
    KeyRevocation,
    SubkeyRevocation,
    CertRevocation,
    Other(u8),
}

impl SignatureType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Self::Binary,
            0x01 => Self::Text,
            0x10 => Self::GenericCert,
            0x13 => Self::PositiveCert,
            0x18 => Self::SubkeyBinding,
            0x19 => Self::PrimaryKeyBinding,
            0x1f => Self::DirectKey,
            0x20 => Self::KeyRevocation,
            0x28 => Self::SubkeyRevocation,
            0x30 => Self::CertRevocation,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Binary => 0x00,
            Self::Text => 0x01,
            Self::GenericCert => 0x10,
            Self::PositiveCert => 0x13,
            Self::SubkeyBinding => 0x18,
            Self::PrimaryKeyBinding => 0x19,
            Self::DirectKey => 0x1f,
            Self::KeyRevocation => 0x20,
            Self::SubkeyRevocation => 0x28,
            Self::CertRevocation => 0x30,
            Self::Other(b) => b,
        }
    }
}

/// The engine's own object for a decoded component, such as the library
/// packet it was read from. Equality ignores it.
#[derive(Clone)]
pub struct NativeHandle(Arc<dyn Any + Send + Sync>);

impl NativeHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeHandle")
    }
}

impl PartialEq for NativeHandle {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for NativeHandle {}

/// Public half of a primary key or subkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: PublicKeyAlgorithm,
    pub fingerprint: PgpFingerprint,
    pub key_id: u64,
    pub created_at: DateTime<Utc>,
    pub bit_length: u16,
    /// Algorithm-specific public parameters, opaque to this crate.
    pub material: Vec<u8>,
}

impl PublicKey {
    /// Upper-case 16 hex digit long key id.
    pub fn key_id_string(&self) -> String {
        format!("{:016X}", self.key_id)
    }
}

/// Private half of a key as the engine decoded it.
///
/// A key can be in one of three shapes: decrypted (`material` is set),
/// encrypted (`encrypted` with a `sealed` blob) or a stub that carries
/// neither, as exported by smartcard setups.
#[derive(Clone)]
pub struct PrivateKey {
    pub encrypted: bool,
    pub material: Option<Zeroizing<Vec<u8>>>,
    pub sealed: Option<Vec<u8>>,
    pub native: Option<NativeHandle>,
}

impl PrivateKey {
    pub fn decrypted(material: Vec<u8>) -> Self {
        Self {
            encrypted: false,
            material: Some(Zeroizing::new(material)),
            sealed: None,
            native: None,
        }
    }

    pub fn encrypted(sealed: Vec<u8>) -> Self {
        Self {
            encrypted: true,
            material: None,
            sealed: Some(sealed),
            native: None,
        }
    }

    pub fn stub() -> Self {
        Self {
            encrypted: false,
            material: None,
            sealed: None,
            native: None,
        }
    }

    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }

    /// True when actual secret bytes are present and usable.
    pub fn has_material(&self) -> bool {
        !self.encrypted && self.material.is_some()
    }

    pub fn is_stub(&self) -> bool {
        !self.encrypted && self.material.is_none()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("encrypted", &self.encrypted)
            .field("material", &self.material.as_ref().map(|_| "[redacted]"))
            .field("sealed", &self.sealed.as_ref().map(|s| s.len()))
            .finish()
    }
}

/// The parts of a signature packet the identity layer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub sig_type: SignatureType,
    pub hash: HashAlgorithm,
    pub created_at: DateTime<Utc>,
    pub is_primary_id: Option<bool>,
    pub key_lifetime_secs: Option<u32>,
    pub native: Option<NativeHandle>,
}

impl Signature {
    pub fn new(sig_type: SignatureType, hash: HashAlgorithm, created_at: DateTime<Utc>) -> Self {
        Self {
            sig_type,
            hash,
            created_at,
            is_primary_id: None,
            key_lifetime_secs: None,
            native: None,
        }
    }

    pub fn marks_primary(&self) -> bool {
        self.is_primary_id == Some(true)
    }
}

static USER_ID_RXX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([^(<]*?)\s*(?:\((.*?)\))?\s*(?:<([^>]*)>)?\s*$")
        .expect("user id pattern is valid")
});

/// A structured `Name (Comment) <email>` user id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserId {
    pub id: String,
    pub name: String,
    pub comment: String,
    pub email: String,
}

impl UserId {
    pub fn parse(id: &str) -> Self {
        let mut out = UserId {
            id: id.to_string(),
            ..Default::default()
        };
        if let Some(caps) = USER_ID_RXX.captures(id) {
            let field = |i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
            out.name = field(1);
            out.comment = field(2);
            out.email = field(3);
        }
        out
    }
}

/// One user id with its self-signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub user_id: Option<UserId>,
    pub self_signature: Option<Signature>,
    pub native: Option<NativeHandle>,
}

impl Identity {
    pub fn new(name: &str, self_signature: Option<Signature>) -> Self {
        Self {
            name: name.to_string(),
            user_id: Some(UserId::parse(name)),
            self_signature,
            native: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subkey {
    pub public_key: PublicKey,
    pub private_key: Option<PrivateKey>,
    /// Binding signature issued by the primary key.
    pub sig: Signature,
    pub revocation: Option<Signature>,
    pub native: Option<NativeHandle>,
}

/// A subkey the engine could not decode; reported as a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadSubkey {
    pub error: String,
}

/// One decoded key: primary key, identities, revocations and subkeys.
#[derive(Debug, Clone)]
pub struct Entity {
    pub primary_key: PublicKey,
    pub private_key: Option<PrivateKey>,
    pub identities: Vec<Identity>,
    pub revocations: Vec<Signature>,
    pub subkeys: Vec<Subkey>,
    pub bad_subkeys: Vec<BadSubkey>,
    pub native: Option<NativeHandle>,
}

impl Entity {
    pub fn fingerprint(&self) -> PgpFingerprint {
        self.primary_key.fingerprint
    }

    /// Fold another entity with the same primary key into this one.
    pub fn absorb(&mut self, other: Entity) {
        self.identities.extend(other.identities);
        self.revocations.extend(other.revocations);
        self.subkeys.extend(other.subkeys);
        self.bad_subkeys.extend(other.bad_subkeys);
        if self.private_key.is_none() {
            self.private_key = other.private_key;
        }
    }

    /// Any local private key, primary or subkey, still encrypted.
    pub fn is_any_key_encrypted(&self) -> bool {
        self.private_key.as_ref().map_or(false, |k| k.encrypted)
            || self
                .subkeys
                .iter()
                .any(|s| s.private_key.as_ref().map_or(false, |k| k.encrypted))
    }
}
