//! sealtree-crypto: per-file envelopes for secrets at rest
//!
//! Pipeline: plaintext → PBKDF2-SHA256(passphrase, fresh salt) → AES-256-GCM(fresh IV) → JSON envelope
//!
//! Envelope (one JSON object per file):
//! ```text
//! {"v":1,"kdf":"PBKDF2-SHA256","iter":300000,"salt":"<b64>","iv":"<b64>","ct":"<b64>","algo":"AES-GCM-256"}
//! ```
//!
//! `ct` is ciphertext followed by the 16-byte GCM tag. Nothing is shared
//! between envelopes: every file has its own salt, IV and derived key.

pub mod cipher;
pub mod client;
pub mod envelope;
pub mod kdf;
pub mod seal;

pub use cipher::{decrypt, encrypt, generate_iv, generate_salt};
pub use client::{decrypt_envelope, DecryptClient};
pub use envelope::Envelope;
pub use kdf::{derive_key, DerivedKey};
pub use seal::{open, seal};

/// Size of a derived AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a per-envelope PBKDF2 salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
