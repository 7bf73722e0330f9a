//! Core data model types for nibble_trie

mod hash;

pub use hash::{Hash, HASH_LENGTH};
