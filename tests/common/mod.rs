//! Common test setup and utilities for integration tests

use anyhow::{anyhow, Result};
use pgp_identity::crypto::passphrase::SecurePassphrase;
use pgp_identity::crypto::unlock::{PassphraseRequest, PassphraseResponse, SecretUi};
use std::sync::Mutex;

/// Initialize test logging (call once per test)
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Prompt that replays fixed answers and remembers what it was asked.
pub struct ReplayUi {
    answers: Mutex<Vec<String>>,
    seen: Mutex<Vec<PassphraseRequest>>,
}

impl ReplayUi {
    pub fn new(answers: &[&str]) -> Self {
        let mut answers: Vec<String> = answers.iter().map(|a| a.to_string()).collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<PassphraseRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl SecretUi for ReplayUi {
    fn get_passphrase(&self, req: &PassphraseRequest) -> Result<PassphraseResponse> {
        self.seen.lock().unwrap().push(req.clone());
        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow!("out of answers"))?;
        Ok(PassphraseResponse {
            passphrase: SecurePassphrase::new(answer),
            store_secret: false,
        })
    }
}
