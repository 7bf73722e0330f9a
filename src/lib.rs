//! # nibble_trie
//!
//! A Merkle-Patricia trie engine for blockchain state.
//!
//! nibble_trie stores byte keys in a radix-16 trie whose nodes are encoded
//! in a bit-exact binary format and addressed by their Blake2b-256 hash, so
//! the root hash authenticates the whole state and small proofs can show a
//! single key's value to a third party.
//!
//! ## Core Concepts
//!
//! - **Nodes**: leaves and branches with nibble partial keys, encoded by
//!   [`node`] and referenced by Merkle value
//! - **Tries**: copy-on-write [`Trie`]s with cheap snapshots
//! - **Stores**: content-addressed [`store::Database`] implementations
//! - **Proofs**: [`proof::generate`] and [`proof::verify`]
//!
//! ## Example
//!
//! ```ignore
//! use nibble_trie::{proof, store::SharedMemoryDb, Trie};
//!
//! let db = SharedMemoryDb::new();
//! let mut trie = Trie::default();
//! trie.put(b"cat", b"v1".to_vec())?;
//! trie.write_dirty(&db)?;
//!
//! let root = trie.hash()?;
//! let nodes = proof::generate(root, &[b"cat"], &db)?;
//! proof::verify(&nodes, root, b"cat", b"v1")?;
//! ```

pub mod codec;
pub mod config;
pub mod model;
pub mod node;
pub mod proof;
pub mod store;
pub mod trie;

mod error;
mod state_db;

pub use config::TrieConfig;
pub use error::{DecodeError, Error, ProofError, Result};
pub use model::Hash;
pub use node::{Child, Node, NodeKind, StateVersion, StorageValue};
pub use state_db::StateDb;
pub use store::{Database, FileStore, MemoryDB};
pub use trie::{Trie, EMPTY_TRIE_HASH};

/// Database version for format compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"NTRIE_DB";
