//! Core type definitions for VeilDB.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Length of a stored key in hex characters (HMAC-SHA-256 digest).
pub const STORED_KEY_LEN: usize = 64;

/// The on-disk identity of a user key.
///
/// A `StoredKey` is the HMAC-SHA-256 digest of the user key under the
/// database's MAC key, rendered as 64 lowercase hex characters. The raw
/// user key never appears on disk; all tree ordering and log records use
/// this digest. Hex preserves the byte order of the digest, so comparing
/// stored keys lexicographically compares the underlying digests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoredKey(String);

impl StoredKey {
    /// Creates a stored key from a raw MAC digest.
    #[must_use]
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parses a stored key from its hex form, validating shape.
    ///
    /// Used on decode paths (node and log records); a malformed key on disk
    /// is corruption, not caller error.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` if the input is not exactly 64 lowercase hex
    /// characters.
    pub fn from_hex(hex_str: &str) -> CoreResult<Self> {
        if hex_str.len() != STORED_KEY_LEN
            || !hex_str
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(CoreError::corrupt_state(format!(
                "malformed stored key: {hex_str:?}"
            )));
        }
        Ok(Self(hex_str.to_string()))
    }

    /// Returns the hex form of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hex form as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key-value pair held by a B-tree node.
///
/// The key is the MAC digest of the user key; the value is the sealed
/// (encrypted and authenticated) form of the user value. Entries are the
/// only payload the tree ever sees - plaintext exists only transiently in
/// the facade, between the caller and the crypto envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored key (MAC digest, 64 hex chars).
    pub key: StoredKey,
    /// The sealed value (ciphertext plus authentication tag).
    pub value: Vec<u8>,
}

impl Entry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(key: StoredKey, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_key_from_digest() {
        let key = StoredKey::from_digest(&[0xAB; 32]);
        assert_eq!(key.as_str().len(), STORED_KEY_LEN);
        assert!(key.as_str().chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn stored_key_ordering_matches_digest_ordering() {
        let low = StoredKey::from_digest(&[0x00; 32]);
        let high = StoredKey::from_digest(&[0xFF; 32]);
        assert!(low < high);
    }

    #[test]
    fn from_hex_accepts_valid() {
        let hex = "ab".repeat(32);
        let key = StoredKey::from_hex(&hex).unwrap();
        assert_eq!(key.as_str(), hex);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(StoredKey::from_hex("abcd").is_err());
    }

    #[test]
    fn from_hex_rejects_uppercase() {
        let hex = "AB".repeat(32);
        assert!(StoredKey::from_hex(&hex).is_err());
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let hex = "zz".repeat(32);
        assert!(StoredKey::from_hex(&hex).is_err());
    }
}
