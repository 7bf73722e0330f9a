//! Merkle-Patricia trie with copy-on-write snapshots
//!
//! Keys are byte strings walked as nibbles. The root is reachable through
//! an [`Arc`], and so is every decoded child, so a [`Trie::snapshot`] costs a
//! counter bump and an `Arc` clone. Mutations copy a node before touching it
//! whenever the node predates the trie's current generation or is still
//! shared with another root.
//!
//! - `tree`: put, delete and clear-prefix
//! - `walk`: read-only traversal (get, entries, ordered key queries)
//! - `persist`: loading from and writing to a [`Database`](crate::store::Database)

mod persist;
mod tree;
mod walk;

use crate::model::Hash;
use crate::node::{Child, Node, StateVersion};
use crate::store::NULL_NODE;
use crate::Result;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Root hash of a trie without any key
pub static EMPTY_TRIE_HASH: Lazy<Hash> = Lazy::new(|| Hash::digest(NULL_NODE));

/// An in-memory trie
#[derive(Clone, Debug, Default)]
pub struct Trie {
    root: Option<Arc<Node>>,
    generation: u64,
    version: StateVersion,
}

impl Trie {
    /// Create an empty trie using `version` to encode values
    pub fn new(version: StateVersion) -> Self {
        Trie {
            root: None,
            generation: 0,
            version,
        }
    }

    /// Create a trie around an existing root node
    pub fn from_root(root: Node, version: StateVersion) -> Self {
        let generation = root.generation;
        Trie {
            root: Some(Arc::new(root)),
            generation,
            version,
        }
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }

    pub fn version(&self) -> StateVersion {
        self.version
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Start a new generation and return a trie sharing the current root
    ///
    /// Nothing is copied here. Both tries copy a node the first time they
    /// change it, so neither observes the other's writes.
    pub fn snapshot(&mut self) -> Trie {
        self.generation += 1;
        Trie {
            root: self.root.clone(),
            generation: self.generation,
            version: self.version,
        }
    }

    /// A structural copy sharing no node with `self`
    pub fn deep_copy(&self) -> Trie {
        Trie {
            root: self.root.as_deref().map(|root| Arc::new(deep_copy_node(root))),
            generation: self.generation,
            version: self.version,
        }
    }

    /// Root hash, always the Blake2b-256 digest of the root encoding
    pub fn hash(&self) -> Result<Hash> {
        match &self.root {
            None => Ok(*EMPTY_TRIE_HASH),
            Some(root) => root.root_hash(self.version),
        }
    }

    /// Encoding of the root node, the null node for an empty trie
    pub fn root_encoding(&self) -> Result<Vec<u8>> {
        match &self.root {
            None => Ok(NULL_NODE.to_vec()),
            Some(root) => Ok(root.encoding(self.version)?.to_vec()),
        }
    }

    /// Take ownership of `node` for mutation, copying it if it belongs to an
    /// older generation or is still shared.
    fn prepare(&self, node: Arc<Node>) -> Node {
        let mut node = if node.generation < self.generation {
            Node::clone(&node)
        } else {
            Arc::unwrap_or_clone(node)
        };
        node.generation = self.generation;
        node
    }
}

fn deep_copy_node(node: &Node) -> Node {
    let mut copy = node.clone();
    if let Some(branch) = copy.branch_mut() {
        for slot in branch.children.iter_mut() {
            if let Some(Child::Node(child)) = slot {
                *child = Arc::new(deep_copy_node(child));
            }
        }
    }
    copy
}
