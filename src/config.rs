//! Runtime configuration for key handling.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of passphrase prompts before an unlock gives up.
pub const DEFAULT_UNLOCK_ATTEMPTS: usize = 5;

const ENV_UNLOCK_ATTEMPTS: &str = "PGP_IDENTITY_UNLOCK_ATTEMPTS";
const ENV_GPG_PROGRAM: &str = "PGP_IDENTITY_GPG_PROGRAM";
const ENV_IDENTITY_DOMAIN: &str = "PGP_IDENTITY_DOMAIN";

/// Settings shared by every key bundle created through one key manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgpConfig {
    /// Header lines written into every armored block we produce.
    pub armor_headers: BTreeMap<String, String>,
    /// How many times the unlock loop prompts before failing.
    pub unlock_attempts: usize,
    /// Mail domain used to recognise platform usernames in PGP identities.
    pub identity_domain: String,
    /// Binary invoked by the gpg fallback signer.
    pub gpg_program: String,
}

impl Default for PgpConfig {
    fn default() -> Self {
        let mut armor_headers = BTreeMap::new();
        armor_headers.insert(
            "Version".to_string(),
            format!("pgp-identity {}", env!("CARGO_PKG_VERSION")),
        );
        armor_headers.insert("Comment".to_string(), "https://keybase.io/download".to_string());

        Self {
            armor_headers,
            unlock_attempts: DEFAULT_UNLOCK_ATTEMPTS,
            identity_domain: "keybase.io".to_string(),
            gpg_program: "gpg".to_string(),
        }
    }
}

impl PgpConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse PGP config")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `PGP_IDENTITY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(attempts) = std::env::var(ENV_UNLOCK_ATTEMPTS) {
            config.unlock_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_UNLOCK_ATTEMPTS))?;
        }
        if let Ok(program) = std::env::var(ENV_GPG_PROGRAM) {
            if !program.trim().is_empty() {
                config.gpg_program = program.trim().to_string();
            }
        }
        if let Ok(domain) = std::env::var(ENV_IDENTITY_DOMAIN) {
            if !domain.trim().is_empty() {
                config.identity_domain = domain.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.unlock_attempts == 0 {
            return Err(anyhow!("unlock_attempts must be at least 1"));
        }
        if self.gpg_program.trim().is_empty() {
            return Err(anyhow!("gpg_program must not be blank"));
        }
        Ok(())
    }
}
