//! # VeilDB Core
//!
//! Core engine for VeilDB, an embedded, encrypted key-value store built
//! around a disk-resident B-tree with an in-memory node cache and an
//! append-only operation log.
//!
//! This crate provides:
//! - The crypto envelope: values sealed with XChaCha20-Poly1305, user keys
//!   hashed with HMAC-SHA-256 so neither appears on disk in plaintext
//! - A paged node store over an opaque [`veildb_storage`] backend
//! - An LRU node cache with a dirty-eviction flush hook
//! - An append-only, sync-on-append operation log replayed at startup
//! - The B-tree engine (insert/update/delete/read/list with split, merge,
//!   and borrow rebalancing)
//! - The [`Database`] facade wiring them together, and a deferred-batch
//!   [`TransactionManager`]
//!
//! ## Example
//!
//! ```rust
//! use veildb_core::{Config, Database};
//!
//! let enc_key = [7u8; 32];
//! let nonce = [9u8; 24];
//!
//! let db = Database::open_in_memory(b"mac secret", Config::default()).unwrap();
//! db.insert("greeting", b"hello", &enc_key, &nonce).unwrap();
//! assert_eq!(db.read("greeting", &enc_key, &nonce).unwrap(), b"hello");
//! ```
//!
//! ## Collaborator surface
//!
//! The engine implements `insert`, `update`, `delete`, `read`, and
//! `list_keys`, plus the deferred transaction batches. Wire-protocol
//! framing, publish/subscribe fan-out, session authentication, and the
//! auxiliary list/set/hash/sorted-set structures are contracts offered to
//! collaborating layers, not implemented here; a framing layer should also
//! enforce [`Config::max_value_size`] on inbound payloads before they
//! reach the engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
pub mod crypto;
mod database;
mod dir;
mod error;
mod node;
mod oplog;
mod pager;
mod transaction;
mod tree;
mod types;

pub use cache::{FlushFn, NodeCache};
pub use config::{Config, DEFAULT_DB_NAME, DEFAULT_LOG_NAME};
pub use crypto::MacKey;
pub use database::{Database, Stats};
pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult};
pub use node::Node;
pub use oplog::{LogRecord, LogRecordType, OpLog};
pub use pager::NodeStore;
pub use transaction::{TransactionManager, TxOperation};
pub use tree::BTree;
pub use types::{Entry, StoredKey, STORED_KEY_LEN};
