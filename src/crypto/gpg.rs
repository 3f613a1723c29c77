//! Fallback signer backed by the system `gpg` binary.
//!
//! Used when a bundle's secret key lives only in the user's GnuPG keyring
//! (for example on a smartcard), so the in-process engine cannot sign.

use crate::crypto::generic::{EncryptionReason, GenericKey, SecretBoxKey, SigVerifyResult};
use crate::crypto::pgp::armor;
use crate::crypto::pgp::fingerprint::PgpFingerprint;
use crate::error::{PgpError, Result};
use crate::types::{AlgoType, Kid, RawPrivateKey, RawPublicKey, SigId};
use anyhow::{bail, Context};
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

/// Spawn `program` with `args`, feed `input` on stdin and return stdout.
fn run_gpg_with_input(program: &str, args: &[&str], input: &[u8]) -> anyhow::Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("gpg: failed to spawn {}", program))?;

    // Feed stdin from its own thread while stdout and stderr are drained,
    // so neither side blocks on a full pipe. The handle drops (EOF) when
    // the writer finishes.
    let mut stdin = child.stdin.take().context("gpg: failed to open stdin pipe")?;
    let input = input.to_vec();
    let writer = thread::spawn(move || stdin.write_all(&input));

    let output = child
        .wait_with_output()
        .context("gpg: failed to read command output")?;
    match writer.join() {
        Ok(Ok(())) => {}
        // The program may exit without reading all of its input.
        Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Ok(Err(e)) => return Err(e).context("gpg: failed to write to stdin"),
        Err(_) => bail!("gpg: stdin writer panicked"),
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);
        bail!("gpg failed (exit {}): {}", code, stderr.trim());
    }

    String::from_utf8(output.stdout).context("gpg: output was not valid UTF-8")
}

/// A PGP key whose secret half is only reachable through `gpg`.
#[derive(Debug, Clone)]
pub struct GpgKey {
    fingerprint: PgpFingerprint,
    kid: Kid,
    algo: AlgoType,
    program: String,
}

impl GpgKey {
    pub fn new(fingerprint: PgpFingerprint, kid: Kid, algo: AlgoType, program: &str) -> Self {
        Self {
            fingerprint,
            kid,
            algo,
            program: program.to_string(),
        }
    }

    pub fn fingerprint(&self) -> PgpFingerprint {
        self.fingerprint
    }
}

impl GenericKey for GpgKey {
    fn kid(&self) -> Result<Kid> {
        Ok(self.kid.clone())
    }

    fn algo_type(&self) -> AlgoType {
        self.algo
    }

    fn sign_to_string(&self, msg: &[u8]) -> Result<(String, SigId)> {
        let local_user = self.fingerprint.to_string();
        let armored = run_gpg_with_input(
            &self.program,
            &["--batch", "--no-tty", "--armor", "--sign", "--local-user", &local_user],
            msg,
        )
        .map_err(PgpError::Engine)?;

        let block = armor::decode(&armored)?;
        let sig_id = SigId::from_body(&block.data);
        log::info!("Signed {} bytes via {} for key {}", msg.len(), self.program, self.fingerprint.to_key_id());
        Ok((armored, sig_id))
    }

    fn verify_string_and_extract(&self, _sig: &str) -> Result<(Vec<u8>, SigVerifyResult)> {
        Err(PgpError::BadKey("gpg fallback keys cannot verify".to_string()))
    }

    fn encrypt_to_string(&self, _plaintext: &[u8], _sender: Option<&dyn GenericKey>) -> Result<String> {
        Err(PgpError::KeyCannotEncrypt)
    }

    fn decrypt_from_string(&self, _ciphertext: &str) -> Result<(Vec<u8>, Option<Kid>)> {
        Err(PgpError::KeyCannotDecrypt)
    }

    fn secret_symmetric_key(&self, _reason: EncryptionReason) -> Result<SecretBoxKey> {
        Err(PgpError::KeyCannotEncrypt)
    }

    fn can_sign(&self) -> bool {
        true
    }

    fn can_encrypt(&self) -> bool {
        false
    }

    fn can_decrypt(&self) -> bool {
        false
    }

    fn has_secret_key(&self) -> bool {
        true
    }

    fn export_public_and_private(&self) -> Result<(RawPublicKey, Option<RawPrivateKey>)> {
        Err(PgpError::BadKey("gpg fallback keys cannot be exported".to_string()))
    }

    fn verbose_description(&self) -> String {
        format!("GnuPG key {}", self.fingerprint.to_quads())
    }
}
