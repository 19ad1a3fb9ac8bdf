//! B-tree node representation and on-disk encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::{Entry, StoredKey};

/// Magic bytes identifying an encoded node.
pub const NODE_MAGIC: [u8; 4] = *b"VNOD";

/// Current node format version.
pub const NODE_VERSION: u16 = 1;

/// Header size for encoded nodes.
/// magic (4) + version (2) + body length (4) = 10 bytes
pub const NODE_HEADER_SIZE: usize = 10;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Maximum sealed-value size a node entry can carry.
///
/// The encoding uses a 4-byte length field; oversized values are rejected
/// at encode time rather than silently producing an undecodable node.
pub const MAX_VALUE_SIZE: usize = u32::MAX as usize;

/// One B-tree node.
///
/// A node holds entries sorted ascending by stored key, and - when it is
/// not a leaf - one child offset per key gap. Nodes carry no parent
/// pointers: upward context lives on the call stack during recursion, so
/// the structure is acyclic by construction.
///
/// A node is assigned a byte offset when it is written; the in-memory
/// value does not track it. Once appended at an offset a node's bytes are
/// never mutated there - every change produces a new serialization at a
/// new offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    /// Whether this node is a leaf.
    pub is_leaf: bool,
    /// Entries, sorted ascending by stored key.
    pub entries: Vec<Entry>,
    /// Child offsets; `entries.len() + 1` for internal nodes, empty for leaves.
    pub children: Vec<u64>,
}

impl Node {
    /// Creates an empty leaf node.
    #[must_use]
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates an internal node from parts.
    #[must_use]
    pub fn new_internal(entries: Vec<Entry>, children: Vec<u64>) -> Self {
        Self {
            is_leaf: false,
            entries,
            children,
        }
    }

    /// Returns the number of keys in this node.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.entries.len()
    }

    /// Serializes the node.
    ///
    /// Layout:
    ///
    /// ```text
    /// magic (4) | version u16 le | body len u32 le
    /// body: is_leaf u8 | num_keys u16 le
    ///       | num_keys x (key len u16 le | key | value len u32 le | value)
    ///       | num_children u16 le | num_children x offset u64 le
    /// crc32 u32 le over header + body
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if an entry value exceeds
    /// [`MAX_VALUE_SIZE`] or the node holds more than `u16::MAX` keys.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();

        body.push(u8::from(self.is_leaf));

        let num_keys = u16::try_from(self.entries.len())
            .map_err(|_| CoreError::invalid_argument("too many keys in node"))?;
        body.extend_from_slice(&num_keys.to_le_bytes());

        for entry in &self.entries {
            let key_bytes = entry.key.as_bytes();
            let key_len = u16::try_from(key_bytes.len())
                .map_err(|_| CoreError::invalid_argument("key too long"))?;
            body.extend_from_slice(&key_len.to_le_bytes());
            body.extend_from_slice(key_bytes);

            if entry.value.len() > MAX_VALUE_SIZE {
                return Err(CoreError::invalid_argument(format!(
                    "entry value too large: {} bytes exceeds maximum of {} bytes",
                    entry.value.len(),
                    MAX_VALUE_SIZE
                )));
            }
            let val_len = entry.value.len() as u32;
            body.extend_from_slice(&val_len.to_le_bytes());
            body.extend_from_slice(&entry.value);
        }

        let num_children = u16::try_from(self.children.len())
            .map_err(|_| CoreError::invalid_argument("too many children in node"))?;
        body.extend_from_slice(&num_children.to_le_bytes());
        for child in &self.children {
            body.extend_from_slice(&child.to_le_bytes());
        }

        let body_len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_argument("node too large"))?;

        let mut data = Vec::with_capacity(NODE_HEADER_SIZE + body.len() + CRC_SIZE);
        data.extend_from_slice(&NODE_MAGIC);
        data.extend_from_slice(&NODE_VERSION.to_le_bytes());
        data.extend_from_slice(&body_len.to_le_bytes());
        data.extend_from_slice(&body);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        Ok(data)
    }

    /// Parses the header of an encoded node, returning the body length.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` on bad magic or an unsupported version.
    pub fn decode_header(header: &[u8]) -> CoreResult<usize> {
        if header.len() < NODE_HEADER_SIZE {
            return Err(CoreError::corrupt_state("node header too short"));
        }
        if header[0..4] != NODE_MAGIC {
            return Err(CoreError::corrupt_state("invalid node magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > NODE_VERSION {
            return Err(CoreError::corrupt_state(format!(
                "unsupported node version {version}"
            )));
        }
        let body_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);
        Ok(body_len as usize)
    }

    /// Deserializes a full encoded node (header, body, and CRC).
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` or `ChecksumMismatch` if the bytes do not
    /// form a structurally valid node.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let body_len = Self::decode_header(data)?;
        let expected_len = NODE_HEADER_SIZE + body_len + CRC_SIZE;
        if data.len() != expected_len {
            return Err(CoreError::corrupt_state(format!(
                "node length mismatch: expected {expected_len} bytes, got {}",
                data.len()
            )));
        }

        let crc_start = NODE_HEADER_SIZE + body_len;
        let stored_crc = u32::from_le_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let computed_crc = compute_crc32(&data[..crc_start]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        Self::decode_body(&data[NODE_HEADER_SIZE..crc_start])
    }

    fn decode_body(body: &[u8]) -> CoreResult<Self> {
        let mut cursor = 0usize;

        let read_u8 = |cursor: &mut usize| -> CoreResult<u8> {
            let b = *body
                .get(*cursor)
                .ok_or_else(|| CoreError::corrupt_state("unexpected end of node body"))?;
            *cursor += 1;
            Ok(b)
        };
        let read_u16 = |cursor: &mut usize| -> CoreResult<u16> {
            if *cursor + 2 > body.len() {
                return Err(CoreError::corrupt_state("unexpected end of node body"));
            }
            let v = u16::from_le_bytes([body[*cursor], body[*cursor + 1]]);
            *cursor += 2;
            Ok(v)
        };
        let read_u32 = |cursor: &mut usize| -> CoreResult<u32> {
            if *cursor + 4 > body.len() {
                return Err(CoreError::corrupt_state("unexpected end of node body"));
            }
            let bytes: [u8; 4] = body[*cursor..*cursor + 4]
                .try_into()
                .map_err(|_| CoreError::corrupt_state("invalid u32"))?;
            *cursor += 4;
            Ok(u32::from_le_bytes(bytes))
        };
        let read_u64 = |cursor: &mut usize| -> CoreResult<u64> {
            if *cursor + 8 > body.len() {
                return Err(CoreError::corrupt_state("unexpected end of node body"));
            }
            let bytes: [u8; 8] = body[*cursor..*cursor + 8]
                .try_into()
                .map_err(|_| CoreError::corrupt_state("invalid u64"))?;
            *cursor += 8;
            Ok(u64::from_le_bytes(bytes))
        };

        let is_leaf = match read_u8(&mut cursor)? {
            0 => false,
            1 => true,
            other => {
                return Err(CoreError::corrupt_state(format!(
                    "invalid is_leaf flag: {other}"
                )))
            }
        };

        let num_keys = read_u16(&mut cursor)? as usize;
        let mut entries = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let key_len = read_u16(&mut cursor)? as usize;
            if cursor + key_len > body.len() {
                return Err(CoreError::corrupt_state("unexpected end of key"));
            }
            let key_str = std::str::from_utf8(&body[cursor..cursor + key_len])
                .map_err(|_| CoreError::corrupt_state("stored key is not UTF-8"))?;
            let key = StoredKey::from_hex(key_str)?;
            cursor += key_len;

            let val_len = read_u32(&mut cursor)? as usize;
            if cursor + val_len > body.len() {
                return Err(CoreError::corrupt_state("unexpected end of value"));
            }
            let value = body[cursor..cursor + val_len].to_vec();
            cursor += val_len;

            entries.push(Entry::new(key, value));
        }

        let num_children = read_u16(&mut cursor)? as usize;
        let mut children = Vec::with_capacity(num_children);
        for _ in 0..num_children {
            children.push(read_u64(&mut cursor)?);
        }

        if cursor != body.len() {
            return Err(CoreError::corrupt_state(format!(
                "trailing bytes in node body: expected {cursor} bytes, got {}",
                body.len()
            )));
        }

        // Structural consistency: leaves have no children, internal nodes
        // have one more child than keys.
        if is_leaf && !children.is_empty() {
            return Err(CoreError::corrupt_state("leaf node with children"));
        }
        if !is_leaf && children.len() != entries.len() + 1 {
            return Err(CoreError::corrupt_state(format!(
                "internal node with {} keys and {} children",
                entries.len(),
                children.len()
            )));
        }

        Ok(Self {
            is_leaf,
            entries,
            children,
        })
    }
}

/// Computes CRC32 checksum for data (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
