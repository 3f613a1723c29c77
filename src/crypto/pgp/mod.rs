//! PGP key handling
//!
//! This module handles:
//! - Fingerprints and key ids
//! - Armor decoding and legacy header repair
//! - Reading and merging exported keys into a [`KeyBundle`]
//! - Signing and verification through the engine, rPGP by default

pub mod armor;
pub mod bundle;
pub mod engine;
pub mod entity;
pub mod fingerprint;
pub mod keypair;
pub mod reader;
pub mod rpgp_engine;
pub mod signing;
pub mod warnings;

pub use bundle::{check_fingerprint, CopyProvenance, KeyBundle, PgpIdentity, StrippedKey};
pub use engine::{PgpEngine, SignedMessage};
pub use fingerprint::PgpFingerprint;
pub use keypair::PgpKeyManager;
pub use rpgp_engine::RpgpEngine;
pub use warnings::{HashSecurityWarning, HashSecurityWarningType, HashSecurityWarnings, Warnings};
