//! Scripted passphrase prompt for testing unlock flows

use crate::crypto::passphrase::SecurePassphrase;
use crate::crypto::unlock::{PassphraseRequest, PassphraseResponse, SecretUi};
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Answers prompts from a fixed list and records every request.
#[derive(Debug, Default)]
pub struct ScriptedSecretUi {
    answers: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<PassphraseRequest>>,
    declining: bool,
}

impl ScriptedSecretUi {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            declining: false,
        }
    }

    /// A prompt that always fails, as if the user cancelled.
    pub fn declining() -> Self {
        Self {
            declining: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<PassphraseRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

impl SecretUi for ScriptedSecretUi {
    fn get_passphrase(&self, req: &PassphraseRequest) -> Result<PassphraseResponse> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("requests lock poisoned"))?
            .push(req.clone());

        if self.declining {
            return Err(anyhow!("user cancelled the passphrase prompt"));
        }
        let answer = self
            .answers
            .lock()
            .map_err(|_| anyhow!("answers lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted passphrase left"))?;
        Ok(PassphraseResponse {
            passphrase: SecurePassphrase::new(answer),
            store_secret: false,
        })
    }
}
