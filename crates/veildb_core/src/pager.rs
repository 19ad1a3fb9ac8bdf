//! Paged node store: reads and writes encoded nodes at byte offsets.
//!
//! The node file begins with a fixed 16-byte superblock holding the offset
//! of the most recently checkpointed root; everything after it is a
//! concatenation of encoded nodes at monotonically increasing offsets.
//!
//! ```text
//! offset 0:   magic "VELD" (4) | version u16 le | reserved u16 | root offset u64 le
//! offset 16+: encoded nodes, appended
//! ```
//!
//! `write_node` is the only allocator of offsets: every write appends, so
//! two writes of the same logical node yield two distinct offsets and an
//! earlier copy simply becomes unreferenced. The superblock slot and the
//! cache-flush rewrite of a node at its own offset are the only in-place
//! writes in the file.
//!
//! The store is a thin veneer over a shared backend: backends synchronize
//! each call internally, appended bytes are immutable once written, and
//! the one multi-call sequence ([`NodeStore::write_root`]) runs under the
//! engine's exclusive lock, so no locking lives at this layer.

use crate::error::{CoreError, CoreResult};
use crate::node::{Node, NODE_HEADER_SIZE};
use std::sync::Arc;
use veildb_storage::StorageBackend;

/// Magic bytes identifying a VeilDB node file.
pub const FILE_MAGIC: [u8; 4] = *b"VELD";

/// Current node file format version.
pub const FILE_VERSION: u16 = 1;

/// Superblock size: magic (4) + version (2) + reserved (2) + root offset (8).
pub const SUPERBLOCK_SIZE: usize = 16;

/// Root offset value meaning "no root persisted yet".
///
/// Offset 0 can never hold a node because the superblock occupies it.
const NO_ROOT: u64 = 0;

/// Reads and writes B-tree nodes to a storage backend at byte offsets.
///
/// Cheap to clone; clones share the same backend. The cache's flush
/// callback holds a clone so it can rewrite evicted nodes without owning
/// the tree.
#[derive(Clone)]
pub struct NodeStore {
    backend: Arc<dyn StorageBackend>,
}

impl NodeStore {
    /// Opens a node store over the given backend.
    ///
    /// An empty backend is initialized with a fresh superblock; a non-empty
    /// one must begin with a valid superblock.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` if the file starts with an unrecognized
    /// superblock, or a storage error on I/O failure.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let backend: Arc<dyn StorageBackend> = Arc::from(backend);

        if backend.size()? == 0 {
            let mut superblock = Vec::with_capacity(SUPERBLOCK_SIZE);
            superblock.extend_from_slice(&FILE_MAGIC);
            superblock.extend_from_slice(&FILE_VERSION.to_le_bytes());
            superblock.extend_from_slice(&0u16.to_le_bytes());
            superblock.extend_from_slice(&NO_ROOT.to_le_bytes());
            backend.append(&superblock)?;
        } else {
            let header = backend.read_at(0, SUPERBLOCK_SIZE)?;
            if header[0..4] != FILE_MAGIC {
                return Err(CoreError::corrupt_state("invalid node file magic"));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version > FILE_VERSION {
                return Err(CoreError::corrupt_state(format!(
                    "unsupported node file version {version}"
                )));
            }
        }

        Ok(Self { backend })
    }

    /// Appends a node to the file and returns the offset where its
    /// serialization begins.
    ///
    /// This never overwrites: earlier copies of the node remain readable at
    /// their old offsets until they become unreferenced.
    pub fn write_node(&self, node: &Node) -> CoreResult<u64> {
        Ok(self.backend.append(&node.encode()?)?)
    }

    /// Rewrites a node's bytes at its own offset.
    ///
    /// Used by the cache flush path. Nodes are immutable once appended, so
    /// the bytes written here are identical to the bytes already at the
    /// offset; the rewrite exists so eviction has a persistence hook while
    /// durability itself is carried by the op-log and checkpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded node does not fit the region that
    /// exists at `offset`, or on I/O failure.
    pub fn write_node_at(&self, offset: u64, node: &Node) -> CoreResult<()> {
        self.backend.write_at(offset, &node.encode()?)?;
        Ok(())
    }

    /// Reads and decodes one node at the given offset.
    pub fn read_node(&self, offset: u64) -> CoreResult<Node> {
        let mut data = self.backend.read_at(offset, NODE_HEADER_SIZE)?;
        let body_len = Node::decode_header(&data)?;
        let rest = self
            .backend
            .read_at(offset + NODE_HEADER_SIZE as u64, body_len + 4)?;
        data.extend_from_slice(&rest);
        Node::decode(&data)
    }

    /// Returns the root offset recorded in the superblock.
    ///
    /// `None` means no root has been persisted yet.
    pub fn root_offset(&self) -> CoreResult<Option<u64>> {
        let header = self.backend.read_at(0, SUPERBLOCK_SIZE)?;
        let offset = u64::from_le_bytes([
            header[8], header[9], header[10], header[11], header[12], header[13], header[14],
            header[15],
        ]);
        Ok((offset != NO_ROOT).then_some(offset))
    }

    /// Writes the root node and records its offset in the superblock.
    ///
    /// Returns the root's new offset. This is the durability point of a
    /// checkpoint: after it syncs, the next open will find this tree image.
    /// Callers serialize root publishes (the engine holds its exclusive
    /// tree lock across a checkpoint), so the append, the pointer patch,
    /// and the sync are never interleaved with another publish.
    pub fn write_root(&self, root: &Node) -> CoreResult<u64> {
        let offset = self.backend.append(&root.encode()?)?;
        self.backend.write_at(8, &offset.to_le_bytes())?;
        self.backend.sync()?;
        Ok(offset)
    }

    /// Loads the root node recorded in the superblock, if any.
    pub fn load_root(&self) -> CoreResult<Option<(u64, Node)>> {
        match self.root_offset()? {
            None => Ok(None),
            Some(offset) => Ok(Some((offset, self.read_node(offset)?))),
        }
    }

    /// Syncs the node file to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Returns the current file size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

impl std::fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore").finish_non_exhaustive()
    }
}
