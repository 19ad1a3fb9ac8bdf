//! Database directory management.
//!
//! This module handles the file system layout for VeilDB:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK          # Advisory lock for single-process access
//! ├─ veil.db       # Node store (superblock + appended nodes)
//! └─ veil.log      # Operation log
//! ```
//!
//! The LOCK file ensures only one process can use the database at a time.
//! File names come from [`crate::Config`].

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name within the database directory.
const LOCK_FILE: &str = "LOCK";

/// Manages the database directory structure and file locking.
///
/// # Thread Safety
///
/// The `DatabaseDir` holds an exclusive lock on the database directory.
/// Only one `DatabaseDir` instance can exist per directory at a time,
/// across processes. The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Database file name.
    db_name: String,
    /// Log file name.
    log_name: String,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        if !path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_argument(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Non-blocking: a second opener fails fast rather than queueing.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            db_name: config.db_name.clone(),
            log_name: config.log_name.clone(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the node store file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.path.join(&self.db_name)
    }

    /// Returns the path to the operation log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(&self.log_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        let db_dir = DatabaseDir::open(&path, &Config::default()).unwrap();
        assert!(path.is_dir());
        assert_eq!(db_dir.db_path(), path.join("veil.db"));
        assert_eq!(db_dir.log_path(), path.join("veil.log"));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent");

        let config = Config::default().create_if_missing(false);
        assert!(matches!(
            DatabaseDir::open(&path, &config),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        let _first = DatabaseDir::open(&path, &Config::default()).unwrap();
        assert!(matches!(
            DatabaseDir::open(&path, &Config::default()),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let _held = DatabaseDir::open(&path, &Config::default()).unwrap();
        }
        assert!(DatabaseDir::open(&path, &Config::default()).is_ok());
    }

    #[test]
    fn custom_file_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        let config = Config::default().db_name("nodes.bin").log_name("ops.bin");
        let db_dir = DatabaseDir::open(&path, &config).unwrap();
        assert_eq!(db_dir.db_path(), path.join("nodes.bin"));
        assert_eq!(db_dir.log_path(), path.join("ops.bin"));
    }
}
