//! Database facade and recovery.

use crate::cache::NodeCache;
use crate::config::Config;
use crate::crypto::{self, MacKey};
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::oplog::{LogRecord, OpLog};
use crate::pager::NodeStore;
use crate::tree::BTree;
use crate::types::{Entry, StoredKey};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use veildb_storage::StorageBackend;

/// The main database handle.
///
/// `Database` is the primary entry point for interacting with VeilDB. It
/// wires the crypto envelope, the paged node store, the LRU cache, the
/// B-tree, and the operation log together, and owns the recovery and
/// shutdown protocol.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use veildb_core::{Config, Database};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_store"), b"mac secret", Config::default())?;
///
/// db.insert("user:1", b"payload", &enc_key, &nonce)?;
/// let value = db.read("user:1", &enc_key, &nonce)?;
///
/// db.close()?;
/// ```
///
/// # Concurrency
///
/// A single readers-writer lock guards the whole tree: reads hold it
/// shared for the duration of the search and decryption, mutations hold it
/// exclusively through both the structural change and the log append. A
/// reader therefore observes the tree either fully before or fully after
/// any mutation. The cache and the log carry their own internal locks.
///
/// # Durability
///
/// A mutation is acknowledged only after its log record has been synced to
/// disk. The tree image itself catches up at [`checkpoint`](Self::checkpoint)
/// (or [`close`](Self::close)); between checkpoints, recovery replays the
/// log over the last durable root. Dropping the handle without `close` is
/// therefore equivalent to a crash - and safe.
pub struct Database {
    config: Config,
    dir: Option<DatabaseDir>,
    mac_key: MacKey,
    tree: RwLock<BTree>,
    log: OpLog,
    is_open: RwLock<bool>,
}

/// A point-in-time snapshot of engine counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Number of live entries.
    pub entries: usize,
    /// Tree height (a lone leaf root has height 1).
    pub height: usize,
    /// Nodes currently cached.
    pub cached_nodes: usize,
    /// Cache hits since open.
    pub cache_hits: u64,
    /// Cache misses since open.
    pub cache_misses: u64,
    /// Node file size in bytes.
    pub db_bytes: u64,
    /// Operation log size in bytes.
    pub log_bytes: u64,
}

impl Database {
    /// Opens a database in a directory, creating it if configured to.
    ///
    /// The directory is locked against other processes, the node store and
    /// log files are opened (created on demand), the last checkpointed root
    /// is loaded, and the operation log is replayed over it to recover any
    /// state that was acknowledged but not yet checkpointed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the directory lock (`DatabaseLocked`)
    /// - Configuration is invalid (`InvalidArgument`)
    /// - Either file fails to open, decode, or replay
    pub fn open(path: &Path, mac_key: &[u8], config: Config) -> CoreResult<Self> {
        use veildb_storage::FileBackend;

        let dir = DatabaseDir::open(path, &config)?;
        let db_backend = FileBackend::open(&dir.db_path())?;
        let log_backend = FileBackend::open(&dir.log_path())?;

        let mut db = Self::open_with_backends(
            mac_key,
            config,
            Box::new(db_backend),
            Box::new(log_backend),
        )?;
        db.dir = Some(dir);
        info!(path = %path.display(), "database open");
        Ok(db)
    }

    /// Opens a database over caller-supplied backends.
    ///
    /// This is the lower-level constructor behind [`open`](Self::open);
    /// it performs no directory management or locking.
    pub fn open_with_backends(
        mac_key: &[u8],
        config: Config,
        db_backend: Box<dyn StorageBackend>,
        log_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        if config.cache_capacity == 0 {
            return Err(CoreError::invalid_argument(
                "cache capacity must be non-zero",
            ));
        }

        let store = NodeStore::open(db_backend)?;

        // The flush callback persists an evicted node at its own offset.
        let flush_store = store.clone();
        let cache = Arc::new(NodeCache::new(
            config.cache_capacity,
            Box::new(move |offset, node| flush_store.write_node_at(offset, node)),
        ));

        let mut tree = BTree::open(config.min_degree, store, cache)?;
        let log = OpLog::new(log_backend);

        // Replay the log over the checkpointed root. Records carry stored
        // keys and sealed values, so replay drives the tree directly and
        // appends nothing.
        let replayed = log.replay(|record| {
            match record {
                LogRecord::Create { key, value } | LogRecord::Update { key, value } => {
                    tree.insert(Entry::new(key, value))?;
                }
                LogRecord::Delete { key } => {
                    // Redo of a delete whose effect is already in the
                    // checkpoint image finds nothing; that is fine.
                    tree.remove(&key)?;
                }
            }
            Ok(())
        })?;
        if replayed > 0 {
            debug!(records = replayed, "replayed operation log");
        }

        Ok(Self {
            config,
            dir: None,
            mac_key: MacKey::from_bytes(mac_key),
            tree: RwLock::new(tree),
            log,
            is_open: RwLock::new(true),
        })
    }

    /// Opens a fresh in-memory database for testing.
    pub fn open_in_memory(mac_key: &[u8], config: Config) -> CoreResult<Self> {
        use veildb_storage::InMemoryBackend;
        Self::open_with_backends(
            mac_key,
            config,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Inserts a key-value pair.
    ///
    /// The value is sealed and the key hashed before either touches the
    /// tree. Inserting a key that already exists updates its value in
    /// place. Success is acknowledged only after the log record's sync has
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value exceeds the configured
    /// maximum, `Crypto` on envelope failure, or a storage error.
    pub fn insert(
        &self,
        user_key: &str,
        value: &[u8],
        enc_key: &[u8],
        nonce: &[u8],
    ) -> CoreResult<()> {
        self.ensure_open()?;
        self.check_value_size(value)?;

        let sealed = crypto::seal(value, enc_key, nonce)?;
        let stored = crypto::hash_key(&self.mac_key, user_key)?;

        let mut tree = self.tree.write();
        let created = tree.insert(Entry::new(stored.clone(), sealed.clone()))?;
        let record = if created {
            LogRecord::Create {
                key: stored,
                value: sealed,
            }
        } else {
            LogRecord::Update {
                key: stored,
                value: sealed,
            }
        };
        self.log.append(&record)
    }

    /// Replaces the value of an existing key.
    ///
    /// The entry stays logically the same, so the tree's structure is
    /// untouched; only the holding node (and its path) is rewritten.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent, before any side effect.
    pub fn update(
        &self,
        user_key: &str,
        value: &[u8],
        enc_key: &[u8],
        nonce: &[u8],
    ) -> CoreResult<()> {
        self.ensure_open()?;
        self.check_value_size(value)?;

        let sealed = crypto::seal(value, enc_key, nonce)?;
        let stored = crypto::hash_key(&self.mac_key, user_key)?;

        let mut tree = self.tree.write();
        if !tree.update(&stored, sealed.clone())? {
            return Err(CoreError::NotFound);
        }
        self.log.append(&LogRecord::Update {
            key: stored,
            value: sealed,
        })
    }

    /// Deletes a key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent.
    pub fn delete(&self, user_key: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let stored = crypto::hash_key(&self.mac_key, user_key)?;

        let mut tree = self.tree.write();
        if !tree.remove(&stored)? {
            return Err(CoreError::NotFound);
        }
        self.log.append(&LogRecord::Delete { key: stored })
    }

    /// Reads and decrypts the value for a key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent, or `Crypto` if the sealed
    /// value does not authenticate under the given key and nonce.
    pub fn read(&self, user_key: &str, enc_key: &[u8], nonce: &[u8]) -> CoreResult<Vec<u8>> {
        self.ensure_open()?;
        let stored = crypto::hash_key(&self.mac_key, user_key)?;

        let tree = self.tree.read();
        let sealed = tree.get(&stored)?.ok_or(CoreError::NotFound)?;
        crypto::open(&sealed, enc_key, nonce)
    }

    /// Lists every stored key in ascending digest order.
    ///
    /// The output is opaque: stored keys are MAC digests, so the order is
    /// over digests, not over the user keys that produced them.
    pub fn list_keys(&self) -> CoreResult<Vec<StoredKey>> {
        self.ensure_open()?;
        self.tree.read().list_keys()
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.tree.read().len())
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Persists the current tree image and truncates the log.
    ///
    /// Flushes every dirty cache entry, writes the root through the
    /// superblock, syncs the node file, and then empties the log: at that
    /// point the on-disk tree alone reproduces the current state.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;

        let mut tree = self.tree.write();
        let root_offset = tree.checkpoint()?;
        self.log.reset()?;
        debug!(root_offset, "checkpoint complete");
        Ok(())
    }

    /// Checkpoints and closes the database.
    ///
    /// Subsequent operations return `DatabaseClosed`. Closing an already
    /// closed database is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        {
            let mut tree = self.tree.write();
            tree.checkpoint()?;
            self.log.reset()?;
        }
        self.log.sync()?;

        *is_open = false;
        info!("database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the directory path, if this is a persistent database.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// Walks the tree verifying its structural invariants.
    ///
    /// Diagnostic; takes the tree lock shared and reads every node.
    pub fn validate(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.tree.read().validate()
    }

    /// Returns a snapshot of engine counters.
    pub fn stats(&self) -> CoreResult<Stats> {
        self.ensure_open()?;
        let tree = self.tree.read();
        Ok(Stats {
            entries: tree.len(),
            height: tree.height()?,
            cached_nodes: tree.cache().len(),
            cache_hits: tree.cache().hits(),
            cache_misses: tree.cache().misses(),
            db_bytes: tree.store().size()?,
            log_bytes: self.log.size()?,
        })
    }

    /// Returns the current size of the operation log in bytes.
    ///
    /// Non-zero between a mutation and the next checkpoint.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.log.size()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    fn check_value_size(&self, value: &[u8]) -> CoreResult<()> {
        if value.len() > self.config.max_value_size {
            return Err(CoreError::invalid_argument(format!(
                "value of {} bytes exceeds maximum of {} bytes",
                value.len(),
                self.config.max_value_size
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}
