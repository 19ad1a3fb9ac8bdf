//! Append-only operation log.
//!
//! Every acknowledged mutation is recorded here before the caller sees
//! success: `append` syncs the file before returning, which is what makes a
//! mutation durable (the tree image on disk only catches up at checkpoint).
//! At startup the log is replayed over the last checkpointed root to
//! rebuild the state that had not yet been checkpointed.
//!
//! # Recovery Policy
//!
//! Replay distinguishes **tolerated** conditions (crash mid-write) from
//! **fatal** conditions (corruption):
//!
//! - Truncated header or payload at the tail: tolerated. The partial record
//!   represents a write that was interrupted before its sync, so it was
//!   never acknowledged; replay stops cleanly and the next checkpoint
//!   truncates it away.
//! - Bad magic, unknown record type, future version, or CRC mismatch on a
//!   complete record: fatal. These indicate corruption, and the database
//!   must not open over silently lost data.
//!
//! Records carry the *stored* key (MAC digest) and the *sealed* value -
//! never the user key or plaintext, so the log upholds the same
//! at-rest-secrecy invariant as the node file.

use crate::error::{CoreError, CoreResult};
use crate::node::compute_crc32;
use crate::types::StoredKey;
use parking_lot::Mutex;
use veildb_storage::StorageBackend;

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"VLOG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Header size for log records.
/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
const HEADER_SIZE: usize = 11;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A key was created.
    Create = 1,
    /// An existing key's value was replaced.
    Update = 2,
    /// A key was deleted.
    Delete = 3,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Create),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A log record representing one acknowledged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A key was created with the given sealed value.
    Create {
        /// Stored key (MAC digest).
        key: StoredKey,
        /// Sealed value.
        value: Vec<u8>,
    },
    /// An existing key's sealed value was replaced.
    Update {
        /// Stored key (MAC digest).
        key: StoredKey,
        /// Sealed value.
        value: Vec<u8>,
    },
    /// A key was deleted.
    Delete {
        /// Stored key (MAC digest).
        key: StoredKey,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Create { .. } => LogRecordType::Create,
            Self::Update { .. } => LogRecordType::Update,
            Self::Delete { .. } => LogRecordType::Delete,
        }
    }

    /// Returns the stored key this record applies to.
    #[must_use]
    pub fn key(&self) -> &StoredKey {
        match self {
            Self::Create { key, .. } | Self::Update { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// Payload layout: `key len u16 le | key | value len u32 le | value`.
    /// Delete records carry a zero-length value.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let (key, value): (&StoredKey, &[u8]) = match self {
            Self::Create { key, value } | Self::Update { key, value } => (key, value),
            Self::Delete { key } => (key, &[]),
        };

        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len())
            .map_err(|_| CoreError::invalid_argument("key too long"))?;
        let val_len = u32::try_from(value.len())
            .map_err(|_| CoreError::invalid_argument("log record value too large"))?;

        let mut buf = Vec::with_capacity(2 + key_bytes.len() + 4 + value.len());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(key_bytes);
        buf.extend_from_slice(&val_len.to_le_bytes());
        buf.extend_from_slice(value);
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < 2 {
            return Err(CoreError::corrupt_state("log payload too short"));
        }
        let key_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
        let mut cursor = 2;

        if cursor + key_len > payload.len() {
            return Err(CoreError::corrupt_state("unexpected end of log key"));
        }
        let key_str = std::str::from_utf8(&payload[cursor..cursor + key_len])
            .map_err(|_| CoreError::corrupt_state("log key is not UTF-8"))?;
        let key = StoredKey::from_hex(key_str)?;
        cursor += key_len;

        if cursor + 4 > payload.len() {
            return Err(CoreError::corrupt_state("unexpected end of log payload"));
        }
        let val_len = u32::from_le_bytes([
            payload[cursor],
            payload[cursor + 1],
            payload[cursor + 2],
            payload[cursor + 3],
        ]) as usize;
        cursor += 4;

        if cursor + val_len != payload.len() {
            return Err(CoreError::corrupt_state(format!(
                "log payload length mismatch: expected {} bytes, got {}",
                cursor + val_len,
                payload.len()
            )));
        }
        let value = payload[cursor..cursor + val_len].to_vec();

        match record_type {
            LogRecordType::Create => Ok(Self::Create { key, value }),
            LogRecordType::Update => Ok(Self::Update { key, value }),
            LogRecordType::Delete => {
                if !value.is_empty() {
                    return Err(CoreError::corrupt_state("delete record with a value"));
                }
                Ok(Self::Delete { key })
            }
        }
    }
}

/// The append-only operation log.
///
/// `append` serializes the record, writes it, and syncs the file before
/// returning. The append-then-sync pair runs under a dedicated write lock
/// so simultaneous log writers can neither interleave record bytes nor
/// reorder a record after a later record's sync.
pub struct OpLog {
    backend: Box<dyn StorageBackend>,
    write_lock: Mutex<()>,
}

impl OpLog {
    /// Opens the log over the given backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Appends a record and syncs the file.
    ///
    /// When this returns, the mutation it records is durable.
    pub fn append(&self, record: &LogRecord) -> CoreResult<()> {
        let payload = record.encode_payload()?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(record.record_type().as_byte());
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("log record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let _guard = self.write_lock.lock();
        self.backend.append(&data)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Replays all records in order, invoking the callback for each.
    ///
    /// Returns the number of records replayed. A truncated tail record is
    /// treated as end-of-log; corruption of a complete record is fatal.
    pub fn replay<F>(&self, mut on_record: F) -> CoreResult<usize>
    where
        F: FnMut(LogRecord) -> CoreResult<()>,
    {
        let total = self.backend.size()?;
        let mut offset = 0u64;
        let mut count = 0usize;

        while offset < total {
            let remaining = (total - offset) as usize;
            if remaining < HEADER_SIZE {
                // Torn header at the tail: end of log.
                break;
            }

            let header = self.backend.read_at(offset, HEADER_SIZE)?;
            if header[0..4] != LOG_MAGIC {
                return Err(CoreError::corrupt_state(format!(
                    "invalid log magic at offset {offset}"
                )));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version > LOG_VERSION {
                return Err(CoreError::corrupt_state(format!(
                    "unsupported log version {version} at offset {offset}"
                )));
            }
            let type_byte = header[6];
            let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
                CoreError::corrupt_state(format!(
                    "unknown log record type {type_byte} at offset {offset}"
                ))
            })?;
            let payload_len =
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

            if remaining < HEADER_SIZE + payload_len + CRC_SIZE {
                // Torn payload at the tail: end of log.
                break;
            }

            let rest = self
                .backend
                .read_at(offset + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
            let payload = &rest[..payload_len];
            let stored_crc = u32::from_le_bytes([
                rest[payload_len],
                rest[payload_len + 1],
                rest[payload_len + 2],
                rest[payload_len + 3],
            ]);

            let mut header_and_payload = header;
            header_and_payload.extend_from_slice(payload);
            let computed_crc = compute_crc32(&header_and_payload);
            if stored_crc != computed_crc {
                return Err(CoreError::ChecksumMismatch {
                    expected: stored_crc,
                    actual: computed_crc,
                });
            }

            let record = LogRecord::decode_payload(record_type, payload)?;
            on_record(record)?;

            offset += (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
            count += 1;
        }

        Ok(count)
    }

    /// Empties the log.
    ///
    /// Called after a successful checkpoint: everything the log recorded is
    /// now part of the durable tree image.
    pub fn reset(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.backend.truncate(0)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Returns the current log size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Syncs the log file.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Appends raw bytes for crash-scenario tests.
    #[cfg(test)]
    pub(crate) fn append_raw_for_testing(&self, data: &[u8]) {
        self.backend.append(data).unwrap();
    }
}

impl std::fmt::Debug for OpLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpLog").finish_non_exhaustive()
    }
}
