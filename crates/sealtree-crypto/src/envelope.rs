//! Envelope format: the on-disk unit holding one encrypted file
//!
//! Pure data, no I/O and no cryptographic checks. Parsing rejects anything
//! structurally wrong with [`SealError::MalformedEnvelope`]; whether the
//! ciphertext actually verifies is the cipher's job.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sealtree_core::config::MAX_ITERATIONS;
use sealtree_core::{SealError, SealResult};

use crate::cipher::ALGO_ID;
use crate::kdf::KDF_ID;
use crate::{IV_SIZE, SALT_SIZE};

/// The only envelope format version in existence
pub const ENVELOPE_VERSION: u32 = 1;

/// An encrypted file: KDF parameters, IV and `ciphertext || tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Format version (always [`ENVELOPE_VERSION`] for envelopes we write)
    pub version: u32,
    /// PBKDF2 iteration count used to derive this envelope's key
    pub iterations: u32,
    /// Per-envelope PBKDF2 salt
    pub salt: [u8; SALT_SIZE],
    /// Per-envelope AES-GCM IV
    pub iv: [u8; IV_SIZE],
    /// Ciphertext followed by the 16-byte authentication tag
    pub ciphertext: Vec<u8>,
    /// Unknown fields found while parsing, written back unchanged
    pub extra: Map<String, Value>,
}

/// JSON layout; field order here is the canonical serialization order.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    v: u32,
    kdf: String,
    iter: u32,
    salt: String,
    iv: String,
    ct: String,
    algo: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(
        iterations: u32,
        salt: [u8; SALT_SIZE],
        iv: [u8; IV_SIZE],
        ciphertext: Vec<u8>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            iterations,
            salt,
            iv,
            ciphertext,
            extra: Map::new(),
        }
    }

    /// Serialize to canonical compact JSON bytes
    pub fn to_bytes(&self) -> SealResult<Vec<u8>> {
        let wire = WireEnvelope {
            v: self.version,
            kdf: KDF_ID.to_string(),
            iter: self.iterations,
            salt: STANDARD.encode(self.salt),
            iv: STANDARD.encode(self.iv),
            ct: STANDARD.encode(&self.ciphertext),
            algo: ALGO_ID.to_string(),
            extra: self.extra.clone(),
        };
        serde_json::to_vec(&wire)
            .map_err(|e| SealError::MalformedEnvelope(format!("serialization: {e}")))
    }

    /// Deserialize from JSON bytes, validating structure and tags
    pub fn from_bytes(data: &[u8]) -> SealResult<Self> {
        let wire: WireEnvelope = serde_json::from_slice(data)
            .map_err(|e| SealError::MalformedEnvelope(e.to_string()))?;

        if wire.v != ENVELOPE_VERSION {
            return Err(SealError::MalformedEnvelope(format!(
                "unsupported version {}",
                wire.v
            )));
        }
        if wire.kdf != KDF_ID {
            return Err(SealError::MalformedEnvelope(format!(
                "unsupported kdf {:?}",
                wire.kdf
            )));
        }
        if wire.algo != ALGO_ID {
            return Err(SealError::MalformedEnvelope(format!(
                "unsupported algo {:?}",
                wire.algo
            )));
        }
        if wire.iter == 0 {
            return Err(SealError::MalformedEnvelope(
                "iteration count must be positive".into(),
            ));
        }
        if wire.iter > MAX_ITERATIONS {
            return Err(SealError::MalformedEnvelope(format!(
                "iteration count {} exceeds {MAX_ITERATIONS}",
                wire.iter
            )));
        }

        Ok(Self {
            version: wire.v,
            iterations: wire.iter,
            salt: decode_fixed("salt", &wire.salt)?,
            iv: decode_fixed("iv", &wire.iv)?,
            ciphertext: decode_field("ct", &wire.ct)?,
            extra: wire.extra,
        })
    }
}

fn decode_field(name: &str, s: &str) -> SealResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| SealError::MalformedEnvelope(format!("{name}: base64 decode: {e}")))
}

fn decode_fixed<const N: usize>(name: &str, s: &str) -> SealResult<[u8; N]> {
    let bytes = decode_field(name, s)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        SealError::MalformedEnvelope(format!("{name}: expected {N} bytes, got {}", v.len()))
    })
}
