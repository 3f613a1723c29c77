//! Platform-level identifiers shared by every key kind.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Version byte that leads every binary KID.
pub const KID_VERSION_V1: u8 = 0x01;
/// Trailing byte of a binary KID.
pub const KID_SUFFIX: u8 = 0x0a;
/// Trailing byte of a signature id.
pub const SIG_ID_SUFFIX: u8 = 0x0f;

/// Key algorithm as encoded in the second byte of a KID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgoType {
    PgpBase,
    PgpRsa,
    PgpElgamal,
    PgpDsa,
    PgpEcdh,
    PgpEcdsa,
    PgpEddsa,
    NaclEddsa,
    NaclDh,
    Unknown(u8),
}

impl AlgoType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => AlgoType::PgpBase,
            0x01 | 0x02 | 0x03 => AlgoType::PgpRsa,
            0x10 => AlgoType::PgpElgamal,
            0x11 => AlgoType::PgpDsa,
            0x12 => AlgoType::PgpEcdh,
            0x13 => AlgoType::PgpEcdsa,
            0x16 => AlgoType::PgpEddsa,
            0x20 => AlgoType::NaclEddsa,
            0x21 => AlgoType::NaclDh,
            other => AlgoType::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            AlgoType::PgpBase => 0x00,
            AlgoType::PgpRsa => 0x01,
            AlgoType::PgpElgamal => 0x10,
            AlgoType::PgpDsa => 0x11,
            AlgoType::PgpEcdh => 0x12,
            AlgoType::PgpEcdsa => 0x13,
            AlgoType::PgpEddsa => 0x16,
            AlgoType::NaclEddsa => 0x20,
            AlgoType::NaclDh => 0x21,
            AlgoType::Unknown(b) => b,
        }
    }

    pub fn is_pgp(self) -> bool {
        matches!(
            self,
            AlgoType::PgpBase
                | AlgoType::PgpRsa
                | AlgoType::PgpElgamal
                | AlgoType::PgpDsa
                | AlgoType::PgpEcdh
                | AlgoType::PgpEcdsa
                | AlgoType::PgpEddsa
        )
    }
}

/// Raw KID bytes: `{version}{algorithm}{material}{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryKid(Vec<u8>);

impl BinaryKid {
    pub fn new(algo: u8, material: &[u8]) -> Self {
        let mut out = Vec::with_capacity(material.len() + 3);
        out.push(KID_VERSION_V1);
        out.push(algo);
        out.extend_from_slice(material);
        out.push(KID_SUFFIX);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_kid(&self) -> Kid {
        Kid(hex::encode(&self.0))
    }
}

/// Hex-rendered KID; the value used to address a key across the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kid(String);

impl Kid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a produced signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigId(String);

impl SigId {
    /// SHA-256 of the binary signature body, hex, with the sig-id suffix.
    pub fn from_body(body: &[u8]) -> Self {
        let sum = Sha256::digest(body);
        let mut s = hex::encode(sum);
        s.push_str(&hex::encode([SIG_ID_SUFFIX]));
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized public key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPublicKey(pub Vec<u8>);

/// Serialized private key material in its current (possibly unlocked) state.
#[derive(Clone, PartialEq, Eq, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct RawPrivateKey(pub Vec<u8>);

impl fmt::Debug for RawPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPrivateKey([redacted; {} bytes])", self.0.len())
    }
}

/// State of a proof backing a tracked identity component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofState {
    None,
    Ok,
    TempFailure,
    PermFailure,
    Looking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    None,
    Keybase,
    Pgp,
    GenericWebSite,
    Dns,
}

/// Something that can appear as one component of a tracking statement.
pub trait TrackIdComponent {
    fn to_id_string(&self) -> String;
    fn to_key_value_pair(&self) -> (String, String);
    fn proof_state(&self) -> ProofState;
    fn last_writer_wins(&self) -> bool;
    fn proof_type(&self) -> ProofType;
}
