//! Key material and the operations on it
//!
//! This module provides:
//! - PGP bundles behind the [`GenericKey`] capability surface
//! - NaCl signing keys sharing the same surface
//! - Passphrase prompting and the unlock retry loop

pub mod generic;
pub mod gpg;
pub mod nacl;
pub mod passphrase;
pub mod pgp;
pub mod unlock;

pub use generic::{GenericKey, SigVerifyResult};
pub use passphrase::SecurePassphrase;
pub use pgp::{KeyBundle, PgpFingerprint, PgpKeyManager};
pub use unlock::{KeyUnlocker, SecretUi};
