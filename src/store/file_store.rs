//! Single-file store for trie nodes and hashed storage values
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("NTRIE_DB")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes (bit 0: compress new blobs)
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - roots_offset: 8 bytes (u64 LE)
//!   - roots_count: 8 bytes (u64 LE)
//!   - reserved: 16 bytes
//!
//! [BLOBS: variable]
//!   - packed blobs, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (key, offset, size) entries
//!
//! [ROOTS: variable]
//!   - root names → state root hashes
//!   - head name: 2 bytes (u16 LE) + name
//! ```

use super::blob::Blob;
use super::Database;
use crate::model::{Hash, HASH_LENGTH};
use crate::trie::EMPTY_TRIE_HASH;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

const HEADER_SIZE: u64 = 64;

/// Index entry size: 32 (key) + 8 (offset) + 4 (size)
const INDEX_ENTRY_SIZE: usize = HASH_LENGTH + 12;

const FLAG_COMPRESS: u32 = 1;

/// Name of the root created with every new store
pub const DEFAULT_ROOT: &str = "main";

/// Index entry for a blob
#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// A key/value store backed by a single append-only file
pub struct FileStore {
    /// Path to the database file
    path: std::path::PathBuf,
    /// The file handle
    file: RwLock<File>,
    /// In-memory index
    index: RwLock<HashMap<Hash, IndexEntry>>,
    /// Named state roots
    roots: RwLock<HashMap<String, Hash>>,
    /// Name of the current root
    head: RwLock<String>,
    /// Current append position
    write_offset: RwLock<u64>,
    compress: RwLock<bool>,
}

fn read_u64(header: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&header[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_name(file: &mut File) -> Result<String> {
    let mut len_buf = [0u8; 2];
    file.read_exact(&mut len_buf)?;
    let mut name_buf = vec![0u8; usize::from(u16::from_le_bytes(len_buf))];
    file.read_exact(&mut name_buf)?;
    String::from_utf8(name_buf).map_err(|_| Error::Corruption("Root name is not UTF-8".into()))
}

fn write_name(file: &mut File, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| Error::Config(format!("Root name too long: {} bytes", name.len())))?;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(name.as_bytes())?;
    Ok(())
}

fn read_u32(header: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&header[at..at + 4]);
    u32::from_le_bytes(bytes)
}

impl FileStore {
    /// Create a new database file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&FLAG_COMPRESS.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        let mut roots = HashMap::new();
        roots.insert(DEFAULT_ROOT.to_string(), *EMPTY_TRIE_HASH);

        debug!(path = %path.display(), "created file store");
        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            roots: RwLock::new(roots),
            head: RwLock::new(DEFAULT_ROOT.to_string()),
            write_offset: RwLock::new(HEADER_SIZE),
            compress: RwLock::new(true),
        })
    }

    /// Open an existing database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header, 8);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let flags = read_u32(&header, 12);
        let object_count = read_u64(&header, 16);
        let index_offset = read_u64(&header, 24);
        let roots_offset = read_u64(&header, 32);
        let roots_count = read_u64(&header, 40);

        let mut index = HashMap::new();
        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut entry_buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut entry_buf)?;

                let key = Hash::from_slice(&entry_buf[..HASH_LENGTH])
                    .ok_or_else(|| Error::Corruption("Truncated index entry".into()))?;
                let offset = read_u64(&entry_buf, HASH_LENGTH);
                let size = read_u32(&entry_buf, HASH_LENGTH + 8);

                index.insert(key, IndexEntry { offset, size });
            }
        }

        let mut roots = HashMap::new();
        let mut head_name = DEFAULT_ROOT.to_string();
        if roots_offset > 0 {
            file.seek(SeekFrom::Start(roots_offset))?;
            for _ in 0..roots_count {
                let name = read_name(&mut file)?;

                let mut hash_buf = [0u8; HASH_LENGTH];
                file.read_exact(&mut hash_buf)?;

                roots.insert(name, Hash::from_bytes(hash_buf));
            }
            head_name = read_name(&mut file)?;
        }

        if roots.is_empty() {
            roots.insert(DEFAULT_ROOT.to_string(), *EMPTY_TRIE_HASH);
        }
        if !roots.contains_key(&head_name) {
            return Err(Error::Corruption(format!(
                "head '{}' names no stored root",
                head_name
            )));
        }

        // Blobs end where the index begins
        let write_offset = if index_offset > 0 {
            index_offset
        } else {
            file.seek(SeekFrom::End(0))?
        };

        debug!(path = %path.display(), objects = index.len(), "opened file store");
        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            roots: RwLock::new(roots),
            head: RwLock::new(head_name),
            write_offset: RwLock::new(write_offset),
            compress: RwLock::new(flags & FLAG_COMPRESS != 0),
        })
    }

    /// Open or create a database file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Whether blobs written from now on are zstd-compressed
    pub fn set_compression(&self, compress: bool) {
        *self.compress.write() = compress;
    }

    /// Store a blob under `key`; writing an existing key is a no-op
    pub fn put_blob(&self, key: Hash, data: &[u8]) -> Result<()> {
        if self.index.read().contains_key(&key) {
            return Ok(());
        }

        let packed = Blob::new(data.to_vec()).pack(*self.compress.read())?;
        let size = u32::try_from(packed.len())
            .map_err(|_| Error::Corruption(format!("Blob too large: {} bytes", packed.len())))?;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&packed)?;

            *write_offset = offset + u64::from(size);
            offset
        };

        self.index.write().insert(key, IndexEntry { offset, size });
        Ok(())
    }

    /// Retrieve a blob by key, `None` if it was never stored
    pub fn get_blob(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.index.read().get(key).cloned() else {
            return Ok(None);
        };

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(entry.offset))?;

        let mut data = vec![0u8; entry.size as usize];
        file.read_exact(&mut data)?;

        Ok(Some(Blob::unpack(&data)?.data))
    }

    /// Check if a key exists
    pub fn contains(&self, key: &Hash) -> bool {
        self.index.read().contains_key(key)
    }

    // === Root Management ===

    /// Name of the current root
    pub fn head(&self) -> String {
        self.head.read().clone()
    }

    /// Make `name` the current root
    pub fn set_head(&self, name: &str) -> Result<()> {
        if !self.roots.read().contains_key(name) {
            return Err(Error::RootNotFound(name.to_string()));
        }
        *self.head.write() = name.to_string();
        Ok(())
    }

    /// State root hash stored under `name`
    pub fn get_root(&self, name: &str) -> Option<Hash> {
        self.roots.read().get(name).copied()
    }

    /// Point `name` at a state root, creating the name if needed
    pub fn set_root(&self, name: &str, root: Hash) {
        self.roots.write().insert(name.to_string(), root);
    }

    /// State root of the current head
    pub fn head_root(&self) -> Hash {
        let head = self.head.read();
        self.roots
            .read()
            .get(head.as_str())
            .copied()
            .unwrap_or(*EMPTY_TRIE_HASH)
    }

    /// Create a new name for `root`; the name must not exist yet
    pub fn create_root(&self, name: &str, root: Hash) -> Result<()> {
        if u16::try_from(name.len()).is_err() {
            return Err(Error::Config(format!("Root name too long: {} bytes", name.len())));
        }
        let mut roots = self.roots.write();
        if roots.contains_key(name) {
            return Err(Error::Config(format!("Root '{}' already exists", name)));
        }
        roots.insert(name.to_string(), root);
        Ok(())
    }

    /// Remove a named root other than the current head
    pub fn delete_root(&self, name: &str) -> Result<()> {
        if self.head.read().as_str() == name {
            return Err(Error::Config("Cannot delete the current root".to_string()));
        }
        self.roots
            .write()
            .remove(name)
            .ok_or_else(|| Error::RootNotFound(name.to_string()))?;
        Ok(())
    }

    /// All named roots, sorted by name
    pub fn list_roots(&self) -> Vec<(String, Hash)> {
        let mut roots: Vec<_> = self
            .roots
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        roots.sort();
        roots
    }

    /// Get the number of blobs in the store
    pub fn object_count(&self) -> usize {
        self.index.read().len()
    }

    /// Flush the index, roots and header to disk
    pub fn sync(&self) -> Result<()> {
        let index = self.index.read();
        let roots = self.roots.read();
        let head = self.head.read();
        let write_offset = *self.write_offset.read();
        let flags = if *self.compress.read() { FLAG_COMPRESS } else { 0 };
        let mut file = self.file.write();

        let index_size = index.len() * INDEX_ENTRY_SIZE;
        let roots_offset = write_offset + index_size as u64;

        file.seek(SeekFrom::Start(12))?;
        file.write_all(&flags.to_le_bytes())?;
        file.write_all(&(index.len() as u64).to_le_bytes())?;
        file.write_all(&write_offset.to_le_bytes())?;
        file.write_all(&roots_offset.to_le_bytes())?;
        file.write_all(&(roots.len() as u64).to_le_bytes())?;

        file.seek(SeekFrom::Start(write_offset))?;

        // Sort by key for determinism
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by_key(|(key, _)| **key);
        for (key, entry) in entries {
            file.write_all(key.as_bytes())?;
            file.write_all(&entry.offset.to_le_bytes())?;
            file.write_all(&entry.size.to_le_bytes())?;
        }

        // name_len (u16) + name + hash
        let mut root_list: Vec<_> = roots.iter().collect();
        root_list.sort_by_key(|(name, _)| *name);
        for (name, hash) in root_list {
            write_name(&mut file, name)?;
            file.write_all(hash.as_bytes())?;
        }
        write_name(&mut file, &head)?;

        let end = file.stream_position()?;
        file.set_len(end)?;
        file.sync_all()?;
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Database for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = Hash::from_slice(key).ok_or(Error::InvalidKey(key.len()))?;
        self.get_blob(&key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = Hash::from_slice(key).ok_or(Error::InvalidKey(key.len()))?;
        self.put_blob(key, value)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            warn!(path = %self.path.display(), error = %err, "failed to sync file store on drop");
        }
    }
}
