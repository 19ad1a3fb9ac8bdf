//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Range violations get their own variants instead of being folded into
/// `Io`: a read past the end of the node file usually means a damaged
/// offset, and the engine above maps it to a corruption report rather than
/// a transient I/O failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read addressed bytes beyond the end of the store.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// An in-place write addressed bytes beyond the end of the store.
    ///
    /// `write_at` never extends the store; only `append` allocates.
    #[error("write beyond end of storage: offset {offset}, len {len}, size {size}")]
    WritePastEnd {
        /// The requested write offset.
        offset: u64,
        /// The requested write length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A truncation asked for more bytes than the store holds.
    #[error("truncate beyond end of storage: requested {requested}, size {size}")]
    TruncateBeyondEnd {
        /// The requested new length.
        requested: u64,
        /// The current storage size.
        size: u64,
    },
}
