//! Passphrase-driven unlock of encrypted secret keys.
//!
//! [`KeyUnlocker`] owns the retry loop: it asks a [`SecretUi`] for a
//! passphrase, hands it to an unlock closure and re-prompts only when the
//! closure reports a bad passphrase. Any other failure ends the loop.

use crate::crypto::passphrase::SecurePassphrase;
use crate::error::{PgpError, Result};
use std::fmt;

pub const RETRY_MESSAGE: &str = "Failed to unlock key; bad passphrase";
pub const GIVE_UP_MESSAGE: &str = "Too many failures; giving up";

/// Which secret is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassphraseType {
    PgpKey,
    PassPhrase,
}

/// Everything a prompt implementation needs to ask for a passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseRequest {
    pub reason: String,
    pub description: String,
    /// Shown on every prompt after the first.
    pub retry_message: Option<String>,
    pub passphrase_type: PassphraseType,
    pub use_secret_store: bool,
    /// 1-based attempt number.
    pub attempt: usize,
    pub max_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct PassphraseResponse {
    pub passphrase: SecurePassphrase,
    /// The user asked for the secret to be remembered.
    pub store_secret: bool,
}

/// Interactive passphrase source.
pub trait SecretUi: Send + Sync {
    /// Ask for a passphrase. Returning an error aborts the unlock.
    fn get_passphrase(&self, req: &PassphraseRequest) -> anyhow::Result<PassphraseResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    Locked,
    Unlocking { attempt: usize },
    Unlocked,
    Failed,
}

impl fmt::Display for UnlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockState::Locked => f.write_str("locked"),
            UnlockState::Unlocking { attempt } => write!(f, "unlocking (attempt {})", attempt),
            UnlockState::Unlocked => f.write_str("unlocked"),
            UnlockState::Failed => f.write_str("failed"),
        }
    }
}

/// Bounded prompt-and-retry loop.
pub struct KeyUnlocker<'a> {
    tries: usize,
    reason: String,
    description: String,
    passphrase_type: PassphraseType,
    use_secret_store: bool,
    ui: &'a dyn SecretUi,
    state: UnlockState,
}

impl<'a> KeyUnlocker<'a> {
    pub fn new(
        tries: usize,
        reason: &str,
        description: &str,
        passphrase_type: PassphraseType,
        use_secret_store: bool,
        ui: &'a dyn SecretUi,
    ) -> Self {
        Self {
            tries,
            reason: reason.to_string(),
            description: description.to_string(),
            passphrase_type,
            use_secret_store,
            ui,
            state: UnlockState::Locked,
        }
    }

    pub fn state(&self) -> UnlockState {
        self.state
    }

    /// Prompt until `unlocker` succeeds, fails with something other than a
    /// bad passphrase, or the attempts run out.
    pub fn run<T, F>(&mut self, mut unlocker: F) -> Result<T>
    where
        F: FnMut(&SecurePassphrase, bool) -> Result<T>,
    {
        let mut retry_message = None;

        for attempt in 1..=self.tries {
            self.state = UnlockState::Unlocking { attempt };

            let req = PassphraseRequest {
                reason: self.reason.clone(),
                description: self.description.clone(),
                retry_message: retry_message.clone(),
                passphrase_type: self.passphrase_type,
                use_secret_store: self.use_secret_store,
                attempt,
                max_attempts: self.tries,
            };

            let res = match self.ui.get_passphrase(&req) {
                Ok(res) => res,
                Err(e) => {
                    self.state = UnlockState::Failed;
                    return Err(PgpError::Prompt(e));
                }
            };

            match unlocker(&res.passphrase, res.store_secret) {
                Ok(value) => {
                    log::info!("Unlocked {} on attempt {}", self.description, attempt);
                    self.state = UnlockState::Unlocked;
                    return Ok(value);
                }
                Err(e) if e.is_bad_passphrase() => {
                    log::info!("Bad passphrase for {} (attempt {}/{})", self.description, attempt, self.tries);
                    retry_message = Some(RETRY_MESSAGE.to_string());
                }
                Err(e) => {
                    self.state = UnlockState::Failed;
                    return Err(e);
                }
            }
        }

        self.state = UnlockState::Failed;
        Err(PgpError::BadPassphrase(GIVE_UP_MESSAGE.to_string()))
    }
}
