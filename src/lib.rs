//! pgp-identity - OpenPGP key identity layer
//!
//! This crate wraps OpenPGP keys in a [`KeyBundle`]: fingerprints and key ids,
//! tolerant armor ingestion, merging of split exports, passphrase unlock and
//! the signing/verification surface shared with other key types.

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod types;


// Re-export commonly used items for convenience
pub use config::PgpConfig;
pub use crypto::pgp::{KeyBundle, PgpFingerprint, PgpKeyManager};
pub use error::{PgpError, Result};
