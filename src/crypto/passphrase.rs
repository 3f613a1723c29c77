//! Passphrase handling and the terminal prompt.

use crate::crypto::unlock::{PassphraseRequest, PassphraseResponse, SecretUi};
use anyhow::{anyhow, Result};
use std::fmt;
use std::io::{self, Write};
use zeroize::ZeroizeOnDrop;

/// Passphrase that is wiped from memory when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecurePassphrase {
    passphrase: String,
}

impl SecurePassphrase {
    pub fn new(passphrase: String) -> Self {
        Self { passphrase }
    }

    /// Generate a strong random passphrase (32 alphanumeric characters).
    pub fn generate_strong() -> Self {
        use rand::distributions::{Alphanumeric, DistString};
        Self::new(Alphanumeric.sample_string(&mut rand::thread_rng(), 32))
    }

    pub fn as_str(&self) -> &str {
        &self.passphrase
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.passphrase.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.passphrase.is_empty()
    }
}

impl fmt::Debug for SecurePassphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurePassphrase([redacted])")
    }
}

/// Prompts on the controlling terminal with echo disabled.
#[derive(Debug, Default)]
pub struct TerminalSecretUi;

impl TerminalSecretUi {
    pub fn new() -> Self {
        Self
    }

    fn read_password_secure() -> Result<String> {
        rpassword::read_password().map_err(|e| anyhow!("Failed to read password: {}", e))
    }
}

impl SecretUi for TerminalSecretUi {
    fn get_passphrase(&self, req: &PassphraseRequest) -> Result<PassphraseResponse> {
        let mut stdout = io::stdout();
        if let Some(retry) = &req.retry_message {
            writeln!(stdout, "{}", retry)?;
        }
        writeln!(stdout, "{}", req.description)?;
        write!(
            stdout,
            "Passphrase ({}, attempt {}/{}): ",
            req.reason, req.attempt, req.max_attempts
        )?;
        stdout.flush()?;

        let passphrase = Self::read_password_secure()?;
        if passphrase.is_empty() {
            return Err(anyhow!("Passphrase entry cancelled"));
        }
        Ok(PassphraseResponse {
            passphrase: SecurePassphrase::new(passphrase),
            store_secret: false,
        })
    }
}
