//! Merkle values
//!
//! A node is referenced from its parent by its Merkle value: the encoding
//! itself when it is shorter than 32 bytes, the Blake2b-256 hash of the
//! encoding otherwise. The root is always referenced by hash.

use super::{Node, NodeCache, StateVersion, StorageValue};
use crate::model::{Hash, HASH_LENGTH};
use crate::Result;

/// Merkle value of a non-root node with the given encoding
pub fn merkle_value(encoding: &[u8]) -> Vec<u8> {
    if encoding.len() < HASH_LENGTH {
        encoding.to_vec()
    } else {
        Hash::digest(encoding).as_bytes().to_vec()
    }
}

/// Merkle value of a root node with the given encoding
pub fn merkle_value_root(encoding: &[u8]) -> Hash {
    Hash::digest(encoding)
}

impl Node {
    /// Encoding of this node, computed once and memoized until the node is
    /// marked dirty.
    pub fn encoding(&self, version: StateVersion) -> Result<&[u8]> {
        self.cache
            .slot(version)
            .encoding
            .get_or_try_init(|| {
                let mut buffer = Vec::new();
                self.encode(version, &mut buffer)?;
                Ok(buffer)
            })
            .map(Vec::as_slice)
    }

    /// Merkle value of this node as a child
    pub fn merkle_value(&self, version: StateVersion) -> Result<&[u8]> {
        self.cache
            .slot(version)
            .merkle_value
            .get_or_try_init(|| Ok(merkle_value(self.encoding(version)?)))
            .map(Vec::as_slice)
    }

    /// Merkle value of this node as the trie root
    pub fn root_hash(&self, version: StateVersion) -> Result<Hash> {
        Ok(merkle_value_root(self.encoding(version)?))
    }

    /// Seed the caches with an encoding read from storage or a proof
    ///
    /// The encoding is kept for every version that would reproduce it. Only
    /// an inline value the version would hash makes the two differ; children
    /// are hashes or inlined nodes too short to hold such a value.
    pub(crate) fn with_cached_encoding(mut self, encoding: &[u8]) -> Self {
        let cache = NodeCache::default();
        for version in [StateVersion::V0, StateVersion::V1] {
            let reencodes = !matches!(
                &self.value,
                Some(StorageValue::Inline(bytes)) if version.hashes_value(bytes.len())
            );
            if reencodes {
                let _ = cache.slot(version).encoding.set(encoding.to_vec());
            }
        }
        self.cache = cache;
        self
    }
}
