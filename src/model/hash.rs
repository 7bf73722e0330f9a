//! Content-addressed hash type using Blake2b-256

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// Length in bytes of every hash in the trie
pub const HASH_LENGTH: usize = 32;

/// A 32-byte Blake2b-256 digest
///
/// Used for node Merkle values once an encoding reaches 32 bytes, for the
/// state root, for hashed storage values and as the content store key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// The zero hash (used as a sentinel/null value)
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }

    /// Create a hash from a slice, `None` unless it is exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LENGTH] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }

    /// Hash arbitrary data
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to hex string (no `0x` prefix)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LENGTH {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    /// Get a short prefix for display (first 8 hex chars)
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.short())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_digest() {
        let h1 = Hash::digest(b"hello");
        let h2 = Hash::digest(b"hello");
        let h3 = Hash::digest(b"world");

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_hash_known_vectors() {
        assert_eq!(
            Hash::digest(&[1]).to_hex(),
            "ee155ace9c40292074cb6aff8c9ccdd273c81648ff1149ef36bcea6ebb8a3e25"
        );

        let input: Vec<u8> = (1..=33).collect();
        assert_eq!(
            Hash::digest(&input).to_hex(),
            "fcd2d9ace87052811d9f3427b58ff398d2e9ed83f301bc7ec1be8b593962f17d"
        );
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let h1 = Hash::digest(b"test data");
        let h2 = Hash::from_hex(&h1.to_hex()).unwrap();
        let h3 = Hash::from_hex(&h1.to_string()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1, h3);
    }

    #[test]
    fn test_hash_from_slice() {
        assert!(Hash::from_slice(&[0u8; 31]).is_none());
        assert_eq!(Hash::from_slice(&[0u8; 32]), Some(Hash::ZERO));
    }

    #[test]
    fn test_hash_short() {
        let h = Hash::digest(b"test");
        assert_eq!(h.short().len(), 8);
    }
}
