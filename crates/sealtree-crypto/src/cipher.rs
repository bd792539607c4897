//! AES-256-GCM encryption/decryption of whole files
//!
//! Output layout:
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The IV travels separately in the envelope. Any verification failure is
//! reported as the single [`SealError::DecryptionFailed`] condition.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sealtree_core::{SealError, SealResult};

use crate::kdf::DerivedKey;
use crate::{IV_SIZE, SALT_SIZE, TAG_SIZE};

/// Cipher identifier written into every envelope
pub const ALGO_ID: &str = "AES-GCM-256";

/// Generate a fresh random 16-byte PBKDF2 salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a fresh random 96-bit AES-GCM IV.
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt `plaintext` with AES-256-GCM.
///
/// Returns `ciphertext || tag`. The IV must never be reused with the same key.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey, iv: &[u8; IV_SIZE]) -> SealResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| SealError::Other(anyhow::anyhow!("AES-GCM encryption failed: {e}")))
}

/// Decrypt `ciphertext || tag` with AES-256-GCM.
///
/// Wrong key, tampered bytes and truncated input all fail identically.
pub fn decrypt(ct_with_tag: &[u8], key: &DerivedKey, iv: &[u8; IV_SIZE]) -> SealResult<Vec<u8>> {
    if ct_with_tag.len() < TAG_SIZE {
        return Err(SealError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(iv), ct_with_tag)
        .map_err(|_| SealError::DecryptionFailed)
}
