//! Key derivation: PBKDF2-HMAC-SHA256 passphrase + salt → AES-256 key

use secrecy::{ExposeSecret, SecretString};
use sealtree_core::{SealError, SealResult};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// KDF identifier written into every envelope
pub const KDF_ID: &str = "PBKDF2-SHA256";

/// A 256-bit key derived from a passphrase via PBKDF2.
///
/// Zeroized on drop to prevent secrets lingering in memory.
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from a passphrase and salt using PBKDF2-HMAC-SHA256.
///
/// Deterministic in all three inputs. Every call pays the full iteration
/// cost; results are never cached.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> SealResult<DerivedKey> {
    if iterations == 0 {
        return Err(SealError::Config("KDF iteration count must be positive".into()));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        passphrase.expose_secret().as_bytes(),
        salt,
        iterations,
        &mut key,
    );

    let derived = DerivedKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}
