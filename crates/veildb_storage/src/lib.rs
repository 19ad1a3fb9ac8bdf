//! # VeilDB Storage
//!
//! The byte-store layer underneath VeilDB's node file and operation log.
//!
//! A [`StorageBackend`] is a grow-mostly run of bytes: `append` allocates
//! offsets (that is where node offsets and log-record positions come
//! from), `read_at` fetches ranges back, `write_at` patches the few
//! regions that are ever rewritten in place (the root-pointer slot, an
//! evicted node at its own offset), `truncate` empties the log at a
//! checkpoint, and `sync` is the durability point for acknowledged
//! mutations. Backends interpret none of it - the pager and op-log above
//! own the formats.
//!
//! All operations take `&self` and synchronize internally, because one
//! backend is shared between the tree's read path, the cache's eviction
//! flush, and the log writer.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - one OS file; what real databases run on
//! - [`InMemoryBackend`] - a byte vector; what the tests run on
//!
//! ## Example
//!
//! ```rust
//! use veildb_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"node image").unwrap();
//! assert_eq!(backend.read_at(offset, 10).unwrap(), b"node image");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
