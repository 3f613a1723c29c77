//! ASCII armor (RFC 4880 §6.2) framing for key blocks and messages.
//!
//! The base64 body, CRC-24 and header parsing are rPGP's armor codec. This
//! module only decides where a block starts, so that junk after the BEGIN
//! dashes and a missing END line surface as our own errors.

use crate::error::{PgpError, Result};
use pgp::armor::{self, Dearmor};
use pgp::ser::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Read};

pub use pgp::armor::BlockType;

const BEGIN_PREFIX: &str = "-----BEGIN ";
const END_PREFIX: &str = "-----END ";
const DASHES: &str = "-----";

/// One dearmored block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorBlock {
    pub block_type: BlockType,
    pub headers: Vec<(String, String)>,
    pub data: Vec<u8>,
}

/// Packets that are already serialized, written through as they are.
struct RawPackets<'a>(&'a [u8]);

impl Serialize for RawPackets<'_> {
    fn to_writer<W: io::Write>(&self, writer: &mut W) -> pgp::errors::Result<()> {
        writer.write_all(self.0)?;
        Ok(())
    }

    fn write_len(&self) -> usize {
        self.0.len()
    }
}

/// The block type of a well-formed BEGIN line, if `line` is one.
fn parse_begin(line: &str) -> Option<&str> {
    let block_type = line.strip_prefix(BEGIN_PREFIX)?.strip_suffix(DASHES)?;
    if block_type.is_empty() || block_type.contains(DASHES) {
        return None;
    }
    Some(block_type)
}

/// `text` from its first well-formed BEGIN line on.
///
/// A BEGIN line with anything after its closing dashes is not well formed.
fn locate_block(text: &str) -> Result<&str> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if parse_begin(line.trim_end()).is_some() {
            let block = &text[offset..];
            if !block.lines().any(|l| l.trim_start().starts_with(END_PREFIX)) {
                return Err(PgpError::MissingArmorEnd);
            }
            return Ok(block);
        }
        offset += line.len();
    }
    Err(PgpError::MalformedInput("no armored block found".to_string()))
}

/// Dearmor the first block in `text`.
///
/// Lines before the first well-formed BEGIN line are skipped.
pub fn decode(text: &str) -> Result<ArmorBlock> {
    let block = locate_block(text)?;

    let mut dearmor = Dearmor::new(block.as_bytes());
    let mut data = Vec::new();
    dearmor
        .read_to_end(&mut data)
        .map_err(|e| PgpError::MalformedInput(format!("bad armor: {}", e)))?;

    let block_type = dearmor
        .typ
        .ok_or_else(|| PgpError::MalformedInput("armor without a block type".to_string()))?;
    let headers = dearmor
        .headers
        .iter()
        .flat_map(|(key, values)| values.iter().map(move |v| (key.clone(), v.clone())))
        .collect();

    Ok(ArmorBlock {
        block_type,
        headers,
        data,
    })
}

/// Armor `data` as a `block_type` block with the given header lines and a
/// CRC-24 checksum.
pub fn encode(block_type: BlockType, headers: &BTreeMap<String, String>, data: &[u8]) -> Result<String> {
    let headers: BTreeMap<String, Vec<String>> = headers
        .iter()
        .map(|(key, value)| (key.clone(), vec![value.clone()]))
        .collect();

    let mut out = Vec::new();
    armor::write(&RawPackets(data), block_type, &mut out, Some(&headers), true)
        .map_err(|e| PgpError::Engine(anyhow::Error::new(e).context("failed to armor block")))?;
    String::from_utf8(out).map_err(|e| PgpError::MalformedInput(format!("armor is not UTF-8: {}", e)))
}

/// Armor serialized key bytes as a public or private key block.
pub fn raw_to_armored(raw: &[u8], private: bool, headers: &BTreeMap<String, String>) -> Result<String> {
    let block_type = if private {
        BlockType::PrivateKey
    } else {
        BlockType::PublicKey
    };
    encode(block_type, headers, raw)
}
