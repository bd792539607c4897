use std::path::PathBuf;

use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("config error: {0}")]
    Config(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Wrong passphrase and tampered ciphertext are deliberately the same error.
    #[error("decryption failed: invalid passphrase or corrupted data")]
    DecryptionFailed,

    #[error("envelope not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid file identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote fetch failed for {id}: {message}")]
    RemoteFetch { id: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SealError {
    /// Wrap an I/O error with the path it happened on.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SealError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// True for any failure that a user should see as "bad passphrase, try again".
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, SealError::DecryptionFailed)
    }
}
