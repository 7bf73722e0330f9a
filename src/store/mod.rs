//! Content-addressed storage
//!
//! [`Database`] is the boundary the trie persists through: a plain key/value
//! store where node keys are always 32-byte Blake2b-256 hashes. Two
//! implementations live here:
//!
//! - [`MemoryDB`]: in-memory, reference-counted content store (also used to
//!   hold the nodes of a proof); [`SharedMemoryDb`] puts it behind a lock.
//! - [`FileStore`]: a single-file, append-only store with optional zstd
//!   compression, used by the `ntrie` CLI.

mod blob;
mod file_store;
mod memory_db;

pub use blob::{Blob, BlobEncoding};
pub use file_store::{FileStore, DEFAULT_ROOT};
pub use memory_db::{
    HashKey, KeyFunction, MemoryDB, Prefix, PrefixedKey, SharedMemoryDb, EMPTY_PREFIX, NULL_NODE,
};

use crate::Result;
use std::sync::Arc;

/// Key/value persistence used by the trie
///
/// `get` distinguishes a missing key (`Ok(None)`) from a failed lookup
/// (`Err`).
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}

impl<D: Database + ?Sized> Database for &D {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }
}

impl<D: Database + ?Sized> Database for Arc<D> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }
}
