//! Decrypt-on-demand for callers holding a passphrase
//!
//! Errors are surfaced as-is and never retried here. Callers should treat
//! [`SealError::DecryptionFailed`] as "invalid passphrase, please retry".

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use sealtree_core::{is_safe_relative, mirror_path_for, SealError, SealResult};
use tracing::debug;

use crate::envelope::Envelope;
use crate::seal::open;

/// Parse and decrypt serialized envelope bytes.
pub fn decrypt_envelope(bytes: &[u8], passphrase: &SecretString) -> SealResult<Vec<u8>> {
    let envelope = Envelope::from_bytes(bytes)?;
    open(&envelope, passphrase)
}

/// Reads envelopes from a mirror tree by source-relative file identifier.
#[derive(Debug, Clone)]
pub struct DecryptClient {
    mirror_root: PathBuf,
}

impl DecryptClient {
    pub fn new(mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
        }
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// Envelope path for a file identifier such as `alice.txt` or `team/keys.json`.
    pub fn envelope_path(&self, file_id: &str) -> SealResult<PathBuf> {
        if !is_safe_relative(file_id) {
            return Err(SealError::InvalidIdentifier(file_id.to_string()));
        }
        Ok(mirror_path_for(&self.mirror_root, file_id))
    }

    /// Load and decrypt the envelope for `file_id`.
    pub fn open(&self, file_id: &str, passphrase: &SecretString) -> SealResult<Vec<u8>> {
        let path = self.envelope_path(file_id)?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SealError::NotFound(path));
            }
            Err(e) => return Err(SealError::fs(path, e)),
        };
        debug!(file_id, bytes = bytes.len(), "decrypting envelope");
        decrypt_envelope(&bytes, passphrase)
    }

    /// Decrypt `file_id` and parse its plaintext as JSON.
    pub fn open_json<T: DeserializeOwned>(
        &self,
        file_id: &str,
        passphrase: &SecretString,
    ) -> SealResult<T> {
        let plaintext = self.open(file_id, passphrase)?;
        serde_json::from_slice(&plaintext).map_err(|e| SealError::MalformedPayload(e.to_string()))
    }

    /// [`open`](Self::open) on the blocking pool, keeping key derivation off async workers.
    pub async fn open_async(
        &self,
        file_id: &str,
        passphrase: &SecretString,
    ) -> SealResult<Vec<u8>> {
        let client = self.clone();
        let file_id = file_id.to_string();
        let passphrase = passphrase.clone();
        tokio::task::spawn_blocking(move || client.open(&file_id, &passphrase))
            .await
            .map_err(|e| SealError::Other(anyhow::anyhow!("decrypt task failed: {e}")))?
    }
}
