//! Refresh secrets from an upstream item source
//!
//! A refresh fetches the current item list for a source, compares it with
//! what the mirror already holds, and re-seals only when the payload changed.
//! The plaintext copy in the source tree is rewritten too, so the next sync
//! pass seals the same content instead of reverting it.
//!
//! Payloads are compared by BLAKE3 fingerprint of their canonical JSON.

use secrecy::SecretString;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use sealtree_core::{is_safe_relative, mirror_path_for, Item, SealError, SealResult};
use sealtree_crypto::{decrypt_envelope, seal};

use crate::engine::{write_atomic, SyncOptions};

/// Something that can list the current items of an upstream source.
pub trait ItemSource {
    fn fetch(&self, source_id: &str) -> anyhow::Result<Vec<Item>>;
}

/// Reads item lists from a local JSON document of the form
/// `{ "<source id>": [ { "id": .., "title": .., "publishedAt": .. } ] }`.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ItemSource for JsonFileSource {
    fn fetch(&self, source_id: &str) -> anyhow::Result<Vec<Item>> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", self.path.display()))?;
        let mut sources: std::collections::HashMap<String, Vec<Item>> =
            serde_json::from_slice(&bytes)?;
        sources
            .remove(source_id)
            .ok_or_else(|| anyhow::anyhow!("source {source_id} not present in {}", self.path.display()))
    }
}

/// One secret kept in sync with an upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    /// Identifier passed to [`ItemSource::fetch`]
    pub source_id: String,
    /// Source-relative file identifier of the secret (e.g. `playlist.json`)
    pub file_id: String,
}

impl RefreshTarget {
    pub fn new(source_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            file_id: file_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Payload identical to the sealed one; nothing written
    Unchanged,
    /// Payload differed; re-sealed
    Updated,
    /// No previous secret existed
    Created,
}

/// Fingerprint of an item list in canonical JSON form.
pub fn fingerprint(items: &[Item]) -> SealResult<blake3::Hash> {
    let json = serde_json::to_vec(items).map_err(|e| SealError::Other(e.into()))?;
    Ok(blake3::hash(&json))
}

/// Fingerprint of an existing plaintext; `None` if it is not an item list.
fn fingerprint_plaintext(plaintext: &[u8]) -> Option<blake3::Hash> {
    let items: Vec<Item> = serde_json::from_slice(plaintext).ok()?;
    fingerprint(&items).ok()
}

/// Current plaintext of the secret: the source copy if present, else the
/// decrypted envelope, else nothing.
fn current_plaintext(
    opts: &SyncOptions,
    file_id: &str,
    passphrase: &SecretString,
) -> SealResult<Option<Vec<u8>>> {
    let source_path = opts.source_root.join(file_id);
    match std::fs::read(&source_path) {
        Ok(bytes) => return Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(SealError::fs(source_path, e)),
    }

    let envelope_path = mirror_path_for(&opts.mirror_root, file_id);
    match std::fs::read(&envelope_path) {
        Ok(bytes) => decrypt_envelope(&bytes, passphrase).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SealError::fs(envelope_path, e)),
    }
}

/// Refresh a single secret from `source`.
///
/// An existing envelope that does not open with `passphrase` is an error and
/// is left untouched.
pub fn refresh_secret(
    opts: &SyncOptions,
    target: &RefreshTarget,
    source: &dyn ItemSource,
    passphrase: &SecretString,
) -> SealResult<RefreshOutcome> {
    if !is_safe_relative(&target.file_id) {
        return Err(SealError::InvalidIdentifier(target.file_id.clone()));
    }

    let items = source
        .fetch(&target.source_id)
        .map_err(|e| SealError::RemoteFetch {
            id: target.source_id.clone(),
            message: e.to_string(),
        })?;
    let fresh = fingerprint(&items)?;

    let outcome = match current_plaintext(opts, &target.file_id, passphrase)? {
        None => RefreshOutcome::Created,
        Some(mut existing) => {
            let same = fingerprint_plaintext(&existing) == Some(fresh);
            existing.zeroize();
            if same {
                debug!(file_id = %target.file_id, fingerprint = %fresh, "secret unchanged");
                return Ok(RefreshOutcome::Unchanged);
            }
            RefreshOutcome::Updated
        }
    };

    let mut payload = serde_json::to_vec(&items).map_err(|e| SealError::Other(e.into()))?;
    let result = write_secret(opts, &target.file_id, &payload, passphrase);
    payload.zeroize();
    result?;

    info!(
        source_id = %target.source_id,
        file_id = %target.file_id,
        items = items.len(),
        outcome = ?outcome,
        "secret refreshed"
    );
    Ok(outcome)
}

fn write_secret(
    opts: &SyncOptions,
    file_id: &str,
    payload: &[u8],
    passphrase: &SecretString,
) -> SealResult<()> {
    let bytes = seal(payload, passphrase, opts.iterations)?.to_bytes()?;

    let source_path = opts.source_root.join(file_id);
    write_atomic(&source_path, payload).map_err(|e| SealError::fs(&source_path, e))?;

    let envelope_path = mirror_path_for(&opts.mirror_root, file_id);
    write_atomic(&envelope_path, &bytes).map_err(|e| SealError::fs(&envelope_path, e))
}

/// Refresh every target; one target failing does not stop the others.
pub fn refresh_all(
    opts: &SyncOptions,
    targets: &[RefreshTarget],
    source: &dyn ItemSource,
    passphrase: &SecretString,
) -> Vec<(RefreshTarget, SealResult<RefreshOutcome>)> {
    targets
        .iter()
        .map(|target| {
            let result = refresh_secret(opts, target, source, passphrase);
            if let Err(e) = &result {
                warn!(source_id = %target.source_id, file_id = %target.file_id, error = %e, "refresh failed");
            }
            (target.clone(), result)
        })
        .collect()
}
