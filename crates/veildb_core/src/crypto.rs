//! The cryptographic envelope: value sealing and key hashing.
//!
//! Values are sealed with XChaCha20-Poly1305 before they reach the tree,
//! and user keys are hashed with HMAC-SHA-256 before they are used as tree
//! keys. Together these guarantee that neither a user key nor a value ever
//! appears on disk in plaintext.
//!
//! ## Security Model
//!
//! - XChaCha20-Poly1305 for authenticated encryption (256-bit key,
//!   192-bit nonce, 128-bit tag)
//! - HMAC-SHA-256 for key hashing; the digest - not the user key - is what
//!   the tree orders by and what the op-log records
//! - MAC key material is zeroized on drop
//! - Key derivation from a passphrase uses HKDF-SHA-256
//!
//! ## Nonce reuse
//!
//! The caller supplies one (key, nonce) pair and reuses it for every value.
//! XChaCha's 192-bit nonce makes the reuse itself tolerable for a
//! single-writer store, but byte-identical ciphertexts still reveal when two
//! values are equal. A future revision should derive a per-value nonce from
//! the stored key or an append counter.

use crate::error::{CoreError, CoreResult};
use crate::types::StoredKey;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Size of the XChaCha20-Poly1305 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;
/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// The MAC key used to hash user keys.
///
/// Any byte string is a valid HMAC key. The material is zeroized when the
/// key is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    bytes: Vec<u8>,
}

impl MacKey {
    /// Creates a MAC key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Derives a MAC key from a passphrase using HKDF-SHA-256.
    ///
    /// The salt should be random, unique per database, and stored alongside
    /// it. HKDF is appropriate when the passphrase already has high entropy;
    /// for user-chosen passwords prefer a password hash such as Argon2id.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if HKDF expansion fails.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> CoreResult<Self> {
        use hkdf::Hkdf;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = vec![0u8; KEY_SIZE];
        hk.expand(b"veildb-mac-key-v1", &mut bytes)
            .map_err(|_| CoreError::crypto("HKDF expand failed"))?;

        Ok(Self { bytes })
    }

    /// Returns the key material.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Hashes a user key into its stored form.
///
/// Computes HMAC-SHA-256 over the user key and renders the digest as 64
/// lowercase hex characters. This is the only identity the tree and the
/// op-log ever see.
///
/// # Errors
///
/// Returns a crypto error if the MAC cannot be keyed (HMAC accepts any key
/// length, so this is not expected in practice).
pub fn hash_key(mac_key: &MacKey, user_key: &str) -> CoreResult<StoredKey> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key.as_bytes())
        .map_err(|_| CoreError::crypto("invalid MAC key"))?;
    mac.update(user_key.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(StoredKey::from_digest(&digest))
}

/// Seals a plaintext value with XChaCha20-Poly1305.
///
/// The output is `ciphertext || tag` (the nonce is caller-managed and not
/// embedded).
///
/// # Errors
///
/// Returns a crypto error if the key is not 32 bytes, the nonce is not
/// 24 bytes, or encryption fails.
pub fn seal(plaintext: &[u8], enc_key: &[u8], nonce: &[u8]) -> CoreResult<Vec<u8>> {
    let cipher = cipher_for(enc_key, nonce)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CoreError::crypto("encryption failed"))
}

/// Opens a sealed value, verifying its authentication tag.
///
/// # Errors
///
/// Returns a crypto error if the key or nonce length is invalid, the
/// ciphertext is too short to contain a tag, or the tag does not verify
/// (wrong key, wrong nonce, or tampered data).
pub fn open(ciphertext: &[u8], enc_key: &[u8], nonce: &[u8]) -> CoreResult<Vec<u8>> {
    let cipher = cipher_for(enc_key, nonce)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CoreError::crypto("ciphertext too short"));
    }
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::crypto("decryption failed"))
}

fn cipher_for(enc_key: &[u8], nonce: &[u8]) -> CoreResult<XChaCha20Poly1305> {
    if enc_key.len() != KEY_SIZE {
        return Err(CoreError::crypto(format!(
            "invalid encryption key size: expected {KEY_SIZE} bytes, got {}",
            enc_key.len()
        )));
    }
    if nonce.len() != NONCE_SIZE {
        return Err(CoreError::crypto(format!(
            "invalid nonce size: expected {NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    XChaCha20Poly1305::new_from_slice(enc_key).map_err(|_| CoreError::crypto("invalid key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    fn random_nonce() -> Vec<u8> {
        let mut nonce = vec![0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = random_key();
        let nonce = random_nonce();

        let plaintext = b"Hello, VeilDB!";
        let sealed = seal(plaintext, &key, &nonce).unwrap();

        // Ciphertext should differ from plaintext and carry a tag
        assert_ne!(&sealed[..plaintext.len()], plaintext);
        assert_eq!(sealed.len(), plaintext.len() + TAG_SIZE);

        let opened = open(&sealed, &key, &nonce).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_wrong_key_fails() {
        let nonce = random_nonce();
        let sealed = seal(b"secret", &random_key(), &nonce).unwrap();

        assert!(open(&sealed, &random_key(), &nonce).is_err());
    }

    #[test]
    fn open_wrong_nonce_fails() {
        let key = random_key();
        let sealed = seal(b"secret", &key, &random_nonce()).unwrap();

        assert!(open(&sealed, &key, &random_nonce()).is_err());
    }

    #[test]
    fn open_corrupted_data_fails() {
        let key = random_key();
        let nonce = random_nonce();
        let mut sealed = seal(b"data", &key, &nonce).unwrap();

        let len = sealed.len();
        sealed[len - 1] ^= 0xFF;

        assert!(open(&sealed, &key, &nonce).is_err());
    }

    #[test]
    fn seal_wrong_key_size_fails() {
        let nonce = random_nonce();
        assert!(seal(b"x", &[0u8; 16], &nonce).is_err());
        assert!(seal(b"x", &[0u8; 64], &nonce).is_err());
    }

    #[test]
    fn seal_wrong_nonce_size_fails() {
        let key = random_key();
        assert!(seal(b"x", &key, &[0u8; 12]).is_err());
    }

    #[test]
    fn open_too_short_fails() {
        let key = random_key();
        let nonce = random_nonce();
        assert!(open(&[0u8; 10], &key, &nonce).is_err());
    }

    #[test]
    fn empty_plaintext() {
        let key = random_key();
        let nonce = random_nonce();

        let sealed = seal(b"", &key, &nonce).unwrap();
        let opened = open(&sealed, &key, &nonce).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn same_plaintext_same_nonce_same_ciphertext() {
        // Nonce reuse across values: equal plaintexts produce equal
        // ciphertexts. Documented envelope property, not a surprise.
        let key = random_key();
        let nonce = random_nonce();

        let a = seal(b"same data", &key, &nonce).unwrap();
        let b = seal(b"same data", &key, &nonce).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_key_is_deterministic() {
        let mac_key = MacKey::from_bytes(b"mac secret");

        let a = hash_key(&mac_key, "alpha").unwrap();
        let b = hash_key(&mac_key, "alpha").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_key_distinguishes_keys() {
        let mac_key = MacKey::from_bytes(b"mac secret");

        let a = hash_key(&mac_key, "alpha").unwrap();
        let b = hash_key(&mac_key, "beta").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_key_depends_on_mac_key() {
        let a = hash_key(&MacKey::from_bytes(b"one"), "alpha").unwrap();
        let b = hash_key(&MacKey::from_bytes(b"two"), "alpha").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_key_output_shape() {
        let key = hash_key(&MacKey::from_bytes(b""), "any").unwrap();
        assert_eq!(key.as_str().len(), 64);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn derive_mac_key_from_passphrase() {
        let k1 = MacKey::derive_from_passphrase(b"passphrase", b"salt").unwrap();
        let k2 = MacKey::derive_from_passphrase(b"passphrase", b"salt").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());

        let k3 = MacKey::derive_from_passphrase(b"passphrase", b"other").unwrap();
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }
}
