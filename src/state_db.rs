//! High-level state database API
//!
//! Ties a [`FileStore`] to a working [`Trie`] and the store's named roots.
//! Writes go to the in-memory trie until [`StateDb::commit`] persists the
//! changed nodes and points the current root name at the new state root.

use crate::config::TrieConfig;
use crate::model::Hash;
use crate::proof;
use crate::store::FileStore;
use crate::trie::Trie;
use crate::{Error, Result};
use std::path::Path;
use tracing::debug;

/// The main database interface
pub struct StateDb {
    store: FileStore,
    trie: Trie,
    config: TrieConfig,
    /// Whether there are uncommitted changes
    dirty: bool,
}

impl StateDb {
    /// Create a new database at the given path and save its config
    pub fn create(path: impl AsRef<Path>, config: TrieConfig) -> Result<Self> {
        let path = path.as_ref();
        let store = FileStore::create(path)?;
        store.set_compression(config.compress);
        config.save(path)?;

        Ok(StateDb {
            store,
            trie: Trie::new(config.state_version),
            config,
            dirty: false,
        })
    }

    /// Open an existing database with its saved config
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let config = TrieConfig::load(path.as_ref())?;
        Self::open_with_config(path, config)
    }

    /// Open an existing database, overriding its saved config
    pub fn open_with_config(path: impl AsRef<Path>, config: TrieConfig) -> Result<Self> {
        let store = FileStore::open(path)?;
        store.set_compression(config.compress);
        let trie = Trie::load(&store, store.head_root(), config.state_version)?;

        Ok(StateDb {
            store,
            trie,
            config,
            dirty: false,
        })
    }

    /// Open or create a database
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, TrieConfig::load(path)?)
        }
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    // === Key/value access ===

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.trie.get(key)
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.trie.put(key, value)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove a key, returning whether it existed
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let deleted = self.trie.delete(key)?;
        self.dirty |= deleted;
        Ok(deleted)
    }

    pub fn clear_prefix(&mut self, prefix: &[u8]) -> Result<()> {
        self.trie.clear_prefix(prefix)?;
        self.dirty = true;
        Ok(())
    }

    /// Key/value pairs whose key starts with `prefix`, in key order
    pub fn list(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.trie
            .keys_with_prefix(prefix)
            .into_iter()
            .filter_map(|key| {
                let value = self.trie.get(&key)?;
                Some((key, value))
            })
            .collect()
    }

    /// Root hash of the working state
    pub fn root_hash(&self) -> Result<Hash> {
        self.trie.hash()
    }

    // === Versioning ===

    /// Persist the working state and point the current root name at it
    pub fn commit(&mut self) -> Result<Hash> {
        self.trie.write_dirty(&self.store)?;
        let root = self.trie.hash()?;
        self.store.set_root(&self.store.head(), root);
        self.store.sync()?;
        self.dirty = false;

        debug!(%root, head = %self.store.head(), "committed state");
        Ok(root)
    }

    /// Check if there are uncommitted changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Name of the current root
    pub fn head(&self) -> String {
        self.store.head()
    }

    /// Commit and save the current state root under a new name
    pub fn snapshot(&mut self, name: &str) -> Result<Hash> {
        let root = self.commit()?;
        self.store.create_root(name, root)?;
        self.store.sync()?;
        Ok(root)
    }

    /// Switch to a named root, discarding uncommitted changes
    pub fn checkout(&mut self, name: &str) -> Result<()> {
        let root = self
            .store
            .get_root(name)
            .ok_or_else(|| Error::RootNotFound(name.to_string()))?;
        self.trie = Trie::load(&self.store, root, self.config.state_version)?;
        self.store.set_head(name)?;
        self.store.sync()?;
        self.dirty = false;
        Ok(())
    }

    /// All named roots
    pub fn list_roots(&self) -> Vec<(String, Hash)> {
        self.store.list_roots()
    }

    // === Proofs ===

    /// Commit and build a proof for `keys` against the committed root
    pub fn prove<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> Result<(Hash, Vec<Vec<u8>>)> {
        let root = self.commit()?;
        let nodes = proof::generate(root, keys, &self.store)?;
        Ok((root, nodes))
    }

    /// Number of blobs in the backing store
    pub fn object_count(&self) -> usize {
        self.store.object_count()
    }

    /// Sync to disk
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }
}
