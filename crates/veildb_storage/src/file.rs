//! File-backed storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A storage backend over one OS file.
///
/// VeilDB opens two of these per database: one backing the node file
/// (superblock plus appended node images) and one backing the operation
/// log. Everything the engine knows about either file goes through the
/// [`StorageBackend`] operations; this type only moves bytes.
///
/// One mutex guards the file handle and the tracked length together, so
/// each trait call is a single critical section. The tracked length - not
/// a seek to the end - decides where the next append lands, which keeps
/// offset allocation stable even if something else moved the file cursor.
///
/// # Durability
///
/// `sync` maps to `File::sync_all`. The op-log invokes it after every
/// record append (the point at which a mutation is acknowledged), and the
/// pager invokes it when a checkpoint publishes a new root.
#[derive(Debug)]
pub struct FileBackend {
    inner: Mutex<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    file: File,
    len: u64,
}

impl FileBackend {
    /// Opens the file at `path`, creating it if absent.
    ///
    /// The parent directory must already exist; the database's directory
    /// manager creates it before any backend is opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            inner: Mutex::new(FileInner { file, len }),
        })
    }
}

impl StorageBackend for FileBackend {
    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let offset = inner.len;
        if data.is_empty() {
            return Ok(offset);
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;
        inner.len += data.len() as u64;

        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let end = offset.saturating_add(len as u64);
        if end > inner.len {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: inner.len,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        inner.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let end = offset.saturating_add(data.len() as u64);
        if end > inner.len {
            return Err(StorageError::WritePastEnd {
                offset,
                len: data.len(),
                size: inner.len,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        Ok(())
    }

    fn truncate(&self, new_len: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if new_len > inner.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_len,
                size: inner.len,
            });
        }

        inner.file.set_len(new_len)?;
        inner.file.sync_all()?;
        inner.len = new_len;

        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }
}
