//! 20-byte OpenPGP v4 fingerprints.

use crate::error::{PgpError, Result};
use crate::types::{ProofState, ProofType, TrackIdComponent};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use subtle::ConstantTimeEq;

pub const PGP_FINGERPRINT_LEN: usize = 20;

/// Key under which a fingerprint appears in tracking statements.
pub const PGP_ASSERTION_KEY: &str = "fingerprint";

#[derive(Clone, Copy)]
pub struct PgpFingerprint([u8; PGP_FINGERPRINT_LEN]);

impl PgpFingerprint {
    pub fn new(bytes: [u8; PGP_FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse exactly 40 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != PGP_FINGERPRINT_LEN * 2 {
            return Err(PgpError::BadFingerprintLength(s.len()));
        }
        let mut out = [0u8; PGP_FINGERPRINT_LEN];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| PgpError::MalformedInput(format!("bad fingerprint hex: {}", e)))?;
        Ok(Self(out))
    }

    pub fn from_slice(b: &[u8]) -> Result<Self> {
        let bytes: [u8; PGP_FINGERPRINT_LEN] = b
            .try_into()
            .map_err(|_| PgpError::BadFingerprintLength(b.len()))?;
        Ok(Self(bytes))
    }

    /// Lenient parse: empty or invalid input yields `None`.
    pub fn from_hex_opt(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        Self::from_hex(s).ok()
    }

    pub fn as_bytes(&self) -> &[u8; PGP_FINGERPRINT_LEN] {
        &self.0
    }

    /// Upper-case hex in space separated groups of four.
    pub fn to_quads(&self) -> String {
        let upper = hex::encode_upper(self.0);
        upper
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Short key id: the trailing 8 bytes in upper-case hex.
    pub fn to_key_id(&self) -> String {
        hex::encode_upper(&self.0[12..PGP_FINGERPRINT_LEN])
    }

    pub fn to_display_string(&self, verbose: bool) -> String {
        if verbose {
            self.to_string()
        } else {
            self.to_key_id()
        }
    }

    /// Case-insensitive exact or suffix match against a user query.
    pub fn matches(&self, query: &str, exact: bool) -> bool {
        let ours = self.to_string();
        let query = query.to_lowercase();
        if exact {
            ours == query
        } else {
            ours.ends_with(&query)
        }
    }
}

impl PartialEq for PgpFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PgpFingerprint {}

impl Hash for PgpFingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for PgpFingerprint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PgpFingerprint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for PgpFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PgpFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PgpFingerprint({})", self)
    }
}

/// Accepts plain hex as well as the grouped `to_quads` rendering.
impl FromStr for PgpFingerprint {
    type Err = PgpError;

    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        Self::from_hex(&compact)
    }
}

impl Serialize for PgpFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PgpFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

impl TrackIdComponent for PgpFingerprint {
    fn to_id_string(&self) -> String {
        self.to_string()
    }

    fn to_key_value_pair(&self) -> (String, String) {
        (PGP_ASSERTION_KEY.to_string(), self.to_id_string())
    }

    fn proof_state(&self) -> ProofState {
        ProofState::Ok
    }

    fn last_writer_wins(&self) -> bool {
        false
    }

    fn proof_type(&self) -> ProofType {
        ProofType::Pgp
    }
}
