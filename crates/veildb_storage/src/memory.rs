//! In-memory storage for tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A storage backend held entirely in a byte vector.
///
/// This exists for the engine's test suites: unit tests run the pager,
/// op-log, and tree against it, and crash tests use [`data`](Self::data)
/// and [`with_data`](Self::with_data) to snapshot a "file" and hand the
/// bytes to a second backend, which is how a close-and-reopen is simulated
/// without touching disk. `sync` is a no-op - there is nothing more
/// durable than the vector to push bytes into.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    buf: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over an existing byte image.
    ///
    /// Pairing this with [`data`](Self::data) replays one backend's final
    /// state into a fresh one, the in-memory equivalent of reopening a
    /// database file.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            buf: RwLock::new(data),
        }
    }

    /// Returns a snapshot of the full byte image.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.buf.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let mut buf = self.buf.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let buf = self.buf.read();
        let start = offset as usize;
        let end = start.saturating_add(len);
        if end > buf.len() {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: buf.len() as u64,
            });
        }
        Ok(buf[start..end].to_vec())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut buf = self.buf.write();
        let start = offset as usize;
        let end = start.saturating_add(data.len());
        if end > buf.len() {
            return Err(StorageError::WritePastEnd {
                offset,
                len: data.len(),
                size: buf.len() as u64,
            });
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn truncate(&self, new_len: u64) -> StorageResult<()> {
        let mut buf = self.buf.write();
        if new_len > buf.len() as u64 {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_len,
                size: buf.len() as u64,
            });
        }
        buf.truncate(new_len as usize);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.buf.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn append_allocates_consecutive_offsets() {
        let backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"first").unwrap(), 0);
        assert_eq!(backend.append(b"second").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn reads_back_appended_ranges() {
        let backend = InMemoryBackend::new();
        backend.append(b"record-a|record-b").unwrap();

        assert_eq!(backend.read_at(0, 8).unwrap(), b"record-a");
        assert_eq!(backend.read_at(9, 8).unwrap(), b"record-b");
    }

    #[test]
    fn read_beyond_end_is_rejected() {
        let backend = InMemoryBackend::new();
        backend.append(b"short").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn write_at_patches_without_growing() {
        let backend = InMemoryBackend::new();
        backend.append(b"root=00000000").unwrap();

        backend.write_at(5, b"cafebabe").unwrap();
        assert_eq!(backend.data(), b"root=cafebabe");
    }

    #[test]
    fn write_at_cannot_extend() {
        let backend = InMemoryBackend::new();
        backend.append(b"tiny").unwrap();

        assert!(matches!(
            backend.write_at(2, b"overflows"),
            Err(StorageError::WritePastEnd { .. })
        ));
        assert_eq!(backend.data(), b"tiny");
    }

    #[test]
    fn truncate_discards_the_tail() {
        let backend = InMemoryBackend::new();
        backend.append(b"keep|drop").unwrap();

        backend.truncate(4).unwrap();
        assert_eq!(backend.data(), b"keep");
    }

    #[test]
    fn truncate_beyond_end_is_rejected() {
        let backend = InMemoryBackend::new();
        backend.append(b"bytes").unwrap();

        assert!(matches!(
            backend.truncate(64),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn snapshot_roundtrips_into_fresh_backend() {
        // The crash-test idiom: capture one backend's image, reopen it as
        // another backend, and keep appending where the first stopped.
        let first = InMemoryBackend::new();
        first.append(b"written before the crash").unwrap();

        let second = InMemoryBackend::with_data(first.data());
        assert_eq!(second.size().unwrap(), 24);
        assert_eq!(second.read_at(0, 24).unwrap(), b"written before the crash");
        assert_eq!(second.append(b"|after").unwrap(), 24);
    }

    #[test]
    fn empty_append_returns_end_offset() {
        let backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert_eq!(backend.append(b"").unwrap(), 3);
    }
}
