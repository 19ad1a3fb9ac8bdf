//! Error types for VeilDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in VeilDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key not found.
    ///
    /// Returned by point lookups, updates, and deletes when the stored key
    /// is absent. This is an expected outcome, not a logged event.
    #[error("key not found")]
    NotFound,

    /// Cryptographic operation failed.
    ///
    /// Covers invalid key/nonce lengths, AEAD tag mismatches, and ciphertexts
    /// too short to contain an authentication tag.
    #[error("crypto error: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] veildb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A structural invariant failed during decode.
    ///
    /// The engine should refuse further mutations until reopened.
    #[error("corrupt state: {message}")]
    CorruptState {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid argument provided.
    ///
    /// Caller-side misuse, rejected before any side effect.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// Database is already open or locked by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Transaction not found.
    #[error("transaction not found: {id}")]
    TransactionNotFound {
        /// The unknown transaction id.
        id: u32,
    },

    /// Transaction already active.
    #[error("transaction already active: {id}")]
    TransactionActive {
        /// The conflicting transaction id.
        id: u32,
    },
}

impl CoreError {
    /// Creates a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Creates a corrupt state error.
    pub fn corrupt_state(message: impl Into<String>) -> Self {
        Self::CorruptState {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates an absent key.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
