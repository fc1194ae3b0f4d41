// src/credential.rs

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{LedgerError, LedgerResult};

pub const MIN_PASSCODE_LEN: usize = 4;
pub const MAX_PASSCODE_LEN: usize = 32;

/// Turns a lobby passcode into a stored credential and checks it later.
/// Injected into the lobby service so storage never sees plaintext.
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, lobby_id: &str, passcode: &str) -> String;

    fn verify(&self, lobby_id: &str, passcode: &str, stored: &str) -> bool {
        constant_time_eq(self.hash(lobby_id, passcode).as_bytes(), stored.as_bytes())
    }
}

/// SHA-256 over pepper, lobby id and passcode, hex encoded.
#[derive(Debug, Clone, Default)]
pub struct Sha256Verifier {
    pepper: String,
}

impl Sha256Verifier {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }
}

impl CredentialVerifier for Sha256Verifier {
    fn hash(&self, lobby_id: &str, passcode: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(b":");
        hasher.update(lobby_id.as_bytes());
        hasher.update(b":");
        hasher.update(passcode.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Trimmed passcode, if its length is acceptable.
pub fn validate_passcode(passcode: &str) -> LedgerResult<&str> {
    let trimmed = passcode.trim();
    let len = trimmed.chars().count();
    if !(MIN_PASSCODE_LEN..=MAX_PASSCODE_LEN).contains(&len) {
        return Err(LedgerError::InvalidPasscode(format!(
            "passcode must be {MIN_PASSCODE_LEN} to {MAX_PASSCODE_LEN} characters"
        )));
    }
    Ok(trimmed)
}
