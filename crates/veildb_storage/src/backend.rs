//! Storage backend trait definition.

use crate::error::StorageResult;

/// The byte store underneath a VeilDB database file.
///
/// A database owns two backends: one for the node file (a fixed superblock
/// followed by appended node images) and one for the operation log (a run
/// of framed records). Both files are grow-mostly: new bytes are only ever
/// appended, and the few in-place writes target regions that already
/// exist. The backend knows nothing about either format - it moves bytes,
/// and the pager and op-log above it own all interpretation.
///
/// # Contract
///
/// - `append` returns the offset where the data begins; this is how node
///   offsets and log-record positions are allocated.
/// - `read_at` returns exactly the bytes previously written at a range, and
///   fails rather than short-reads past the end.
/// - `write_at` patches a region that already exists and never grows the
///   store. VeilDB uses it for the root-pointer slot in the superblock and
///   for rewriting an evicted node at its own offset.
/// - `truncate` cuts the store to a length; the op-log empties itself this
///   way after a checkpoint.
/// - `sync` is the durability point: when it returns, everything written so
///   far survives a crash. The op-log calls it after every record, which is
///   what makes an acknowledged mutation durable.
///
/// # Synchronization
///
/// Every method takes `&self` and implementations synchronize internally:
/// a backend is shared between the tree's read path, the cache's eviction
/// flush, and the log writer, and forcing `&mut` on the trait would just
/// push a redundant lock into every caller. Each call is atomic with
/// respect to the others; multi-call sequences that must not interleave
/// (append-then-sync of a log record, publishing a new root) are serialized
/// by the callers that own them.
pub trait StorageBackend: Send + Sync {
    /// Appends `data`, returning the offset where it begins.
    ///
    /// Appending nothing is a no-op that returns the current end offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Reads back `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ReadPastEnd` if any part of the range lies beyond the
    /// current size, or an error if the underlying read fails.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Overwrites an existing region in place.
    ///
    /// The range `[offset, offset + data.len())` must already exist;
    /// `write_at` never extends the store, so a bad offset cannot silently
    /// grow a file that only `append` is supposed to grow.
    ///
    /// # Errors
    ///
    /// Returns `WritePastEnd` if the range extends beyond the current
    /// size, or an error if the underlying write fails.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Cuts the store down to `new_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `TruncateBeyondEnd` if `new_len` exceeds the current size -
    /// truncation only discards, it never pads.
    fn truncate(&self, new_len: u64) -> StorageResult<()>;

    /// Forces everything written so far onto durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails; callers treat that as the
    /// mutation not having happened.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size in bytes - the offset the next `append`
    /// will return.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}
