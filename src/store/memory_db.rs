//! In-memory content store with reference counting
//!
//! Blobs are keyed by their Blake2b-256 hash. Every `insert` bumps the
//! entry's reference count and every `remove` drops it; entries that fall to
//! zero stay readable as absent until [`MemoryDB::purge`] drops them. A
//! reserved null-node blob always hashes to a fixed key and is never stored.

use super::Database;
use crate::model::{Hash, HASH_LENGTH};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Position of a node in the trie: packed nibbles plus an optional trailing
/// odd nibble.
pub type Prefix<'a> = (&'a [u8], Option<u8>);

/// Prefix of the root node
pub const EMPTY_PREFIX: Prefix<'static> = (&[], None);

/// Encoding of the empty trie root
pub const NULL_NODE: &[u8] = &[0x00];

/// Derives the storage key for a blob
pub trait KeyFunction {
    fn key(hash: &Hash, prefix: Prefix<'_>) -> Vec<u8>;
}

/// Keys by hash alone
#[derive(Clone, Copy, Debug, Default)]
pub struct HashKey;

impl KeyFunction for HashKey {
    fn key(hash: &Hash, _prefix: Prefix<'_>) -> Vec<u8> {
        hash.as_bytes().to_vec()
    }
}

/// Keys by trie position followed by hash, so identical blobs at different
/// positions are counted separately.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrefixedKey;

impl KeyFunction for PrefixedKey {
    fn key(hash: &Hash, prefix: Prefix<'_>) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.0.len() + 1 + HASH_LENGTH);
        key.extend_from_slice(prefix.0);
        if let Some(nibble) = prefix.1 {
            key.push(nibble);
        }
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

/// Reference-counted hash to blob map
#[derive(Clone, Debug)]
pub struct MemoryDB<K: KeyFunction = HashKey> {
    data: HashMap<Vec<u8>, (Vec<u8>, i32)>,
    hashed_null_node: Hash,
    null_node_data: Vec<u8>,
    _key_function: PhantomData<K>,
}

impl<K: KeyFunction> Default for MemoryDB<K> {
    fn default() -> Self {
        Self::with_null_node(NULL_NODE)
    }
}

impl<K: KeyFunction> MemoryDB<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a custom null-node blob
    pub fn with_null_node(null_node: &[u8]) -> Self {
        MemoryDB {
            data: HashMap::new(),
            hashed_null_node: Hash::digest(null_node),
            null_node_data: null_node.to_vec(),
            _key_function: PhantomData,
        }
    }

    /// Build a store from a list of blobs, inserting each once
    pub fn from_blobs<I, B>(blobs: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut db = Self::new();
        for blob in blobs {
            db.insert(EMPTY_PREFIX, blob.as_ref());
        }
        db
    }

    pub fn hashed_null_node(&self) -> Hash {
        self.hashed_null_node
    }

    /// Store `value` and return its hash
    pub fn insert(&mut self, prefix: Prefix<'_>, value: &[u8]) -> Hash {
        if value == self.null_node_data.as_slice() {
            return self.hashed_null_node;
        }
        let hash = Hash::digest(value);
        self.emplace(hash, prefix, value.to_vec());
        hash
    }

    /// Store `value` under a hash computed by the caller
    pub fn emplace(&mut self, hash: Hash, prefix: Prefix<'_>, value: Vec<u8>) {
        if value == self.null_node_data {
            return;
        }
        let entry = self
            .data
            .entry(K::key(&hash, prefix))
            .or_insert_with(|| (Vec::new(), 0));
        if entry.1 <= 0 {
            entry.0 = value;
        }
        entry.1 += 1;
    }

    /// Look up a blob by hash
    ///
    /// Only the first 32 bytes of `key` are used; a shorter key is an error
    /// rather than a miss.
    pub fn get(&self, key: &[u8], prefix: Prefix<'_>) -> Result<Option<Vec<u8>>> {
        let hash = Self::hash_from_key(key)?;
        if hash == self.hashed_null_node {
            return Ok(Some(self.null_node_data.clone()));
        }
        Ok(match self.data.get(&K::key(&hash, prefix)) {
            Some((value, rc)) if *rc > 0 => Some(value.clone()),
            _ => None,
        })
    }

    pub fn contains(&self, key: &[u8], prefix: Prefix<'_>) -> Result<bool> {
        Ok(self.get(key, prefix)?.is_some())
    }

    /// Drop one reference to `hash`
    pub fn remove(&mut self, hash: &Hash, prefix: Prefix<'_>) {
        if *hash == self.hashed_null_node {
            return;
        }
        self.data
            .entry(K::key(hash, prefix))
            .or_insert_with(|| (Vec::new(), 0))
            .1 -= 1;
    }

    /// Blob and reference count, including entries that read as absent
    pub fn raw(&self, hash: &Hash, prefix: Prefix<'_>) -> Option<(&[u8], i32)> {
        if *hash == self.hashed_null_node {
            return Some((self.null_node_data.as_slice(), 1));
        }
        self.data
            .get(&K::key(hash, prefix))
            .map(|(value, rc)| (value.as_slice(), *rc))
    }

    /// Drop every entry whose reference count is zero
    pub fn purge(&mut self) {
        self.data.retain(|_, (_, rc)| *rc != 0);
    }

    /// Merge another store's entries and reference counts into this one
    pub fn consolidate(&mut self, other: Self) {
        for (key, (value, rc)) in other.data {
            let entry = self.data.entry(key).or_insert_with(|| (Vec::new(), 0));
            if entry.1 < 0 || entry.0.is_empty() {
                entry.0 = value;
            }
            entry.1 += rc;
        }
    }

    /// Storage keys with their reference counts
    pub fn keys(&self) -> HashMap<Vec<u8>, i32> {
        self.data
            .iter()
            .map(|(key, (_, rc))| (key.clone(), *rc))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn hash_from_key(key: &[u8]) -> Result<Hash> {
        key.get(..HASH_LENGTH)
            .and_then(Hash::from_slice)
            .ok_or(Error::InvalidKey(key.len()))
    }
}

/// A [`MemoryDB`] behind a read/write lock, usable as a [`Database`]
#[derive(Debug, Default)]
pub struct SharedMemoryDb {
    inner: RwLock<MemoryDB>,
}

impl SharedMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn into_inner(self) -> MemoryDB {
        self.inner.into_inner()
    }
}

impl From<MemoryDB> for SharedMemoryDb {
    fn from(db: MemoryDB) -> Self {
        SharedMemoryDb {
            inner: RwLock::new(db),
        }
    }
}

impl Database for SharedMemoryDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.read().get(key, EMPTY_PREFIX)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let hash = MemoryDB::<HashKey>::hash_from_key(key)?;
        self.inner.write().emplace(hash, EMPTY_PREFIX, value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut db = MemoryDB::<HashKey>::new();
        let hash = db.insert(EMPTY_PREFIX, b"hello");
        assert_eq!(hash, Hash::digest(b"hello"));
        assert_eq!(
            db.get(hash.as_bytes(), EMPTY_PREFIX).unwrap(),
            Some(b"hello".to_vec())
        );
        assert_eq!(db.raw(&hash, EMPTY_PREFIX), Some((&b"hello"[..], 1)));
    }

    #[test]
    fn test_get_missing_is_absent_not_error() {
        let db = MemoryDB::<HashKey>::new();
        assert_eq!(db.get(Hash::digest(b"x").as_bytes(), EMPTY_PREFIX).unwrap(), None);
    }

    #[test]
    fn test_get_short_key_is_error() {
        let db = MemoryDB::<HashKey>::new();
        let err = db.get(&[1, 2, 3], EMPTY_PREFIX).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(3)));
    }

    #[test]
    fn test_null_node_is_not_stored() {
        let mut db = MemoryDB::<HashKey>::new();
        let hash = db.insert(EMPTY_PREFIX, NULL_NODE);
        assert_eq!(hash, Hash::digest(&[0x00]));
        assert!(db.is_empty());
        assert_eq!(
            db.get(hash.as_bytes(), EMPTY_PREFIX).unwrap(),
            Some(NULL_NODE.to_vec())
        );
    }

    #[test]
    fn test_reference_counting() {
        let mut db = MemoryDB::<HashKey>::new();
        let hash = db.insert(EMPTY_PREFIX, b"value");
        db.insert(EMPTY_PREFIX, b"value");
        assert_eq!(db.raw(&hash, EMPTY_PREFIX).unwrap().1, 2);

        db.remove(&hash, EMPTY_PREFIX);
        db.remove(&hash, EMPTY_PREFIX);
        assert_eq!(db.get(hash.as_bytes(), EMPTY_PREFIX).unwrap(), None);
        assert_eq!(db.len(), 1);

        db.purge();
        assert!(db.is_empty());
    }

    #[test]
    fn test_insert_resurrects_removed_entry() {
        let mut db = MemoryDB::<HashKey>::new();
        let hash = Hash::digest(b"data");
        db.remove(&hash, EMPTY_PREFIX);
        assert_eq!(db.raw(&hash, EMPTY_PREFIX), Some((&[][..], -1)));

        db.insert(EMPTY_PREFIX, b"data");
        assert_eq!(db.raw(&hash, EMPTY_PREFIX), Some((&b"data"[..], 0)));
        db.insert(EMPTY_PREFIX, b"data");
        assert_eq!(
            db.get(hash.as_bytes(), EMPTY_PREFIX).unwrap(),
            Some(b"data".to_vec())
        );
    }

    #[test]
    fn test_prefixed_keys_count_separately() {
        let mut db = MemoryDB::<PrefixedKey>::new();
        let hash = db.insert((&[0x12], None), b"node");
        db.insert((&[0x12], Some(3)), b"node");
        assert_eq!(db.len(), 2);
        assert!(db.contains(hash.as_bytes(), (&[0x12], Some(3))).unwrap());
        assert!(!db.contains(hash.as_bytes(), EMPTY_PREFIX).unwrap());
    }

    #[test]
    fn test_consolidate() {
        let mut a = MemoryDB::<HashKey>::new();
        let mut b = MemoryDB::<HashKey>::new();
        let hash = a.insert(EMPTY_PREFIX, b"shared");
        b.insert(EMPTY_PREFIX, b"shared");
        let only_b = b.insert(EMPTY_PREFIX, b"only b");

        a.consolidate(b);
        assert_eq!(a.raw(&hash, EMPTY_PREFIX).unwrap().1, 2);
        assert!(a.contains(only_b.as_bytes(), EMPTY_PREFIX).unwrap());
    }

    #[test]
    fn test_shared_memory_db_as_database() {
        let db = SharedMemoryDb::new();
        let hash = Hash::digest(b"blob");
        db.put(hash.as_bytes(), b"blob").unwrap();
        assert_eq!(Database::get(&db, hash.as_bytes()).unwrap(), Some(b"blob".to_vec()));
        assert!(db.put(&[1], b"x").is_err());
    }
}
