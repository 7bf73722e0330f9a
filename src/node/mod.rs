//! Trie nodes
//!
//! A node is either a leaf or a branch. Both carry a partial key (in
//! nibbles) and an optional storage value; a branch additionally owns up to
//! sixteen children. Children are either decoded nodes shared through an
//! [`Arc`], or unresolved placeholders naming the child by hash.
//!
//! Encodings and Merkle values are memoized per node and dropped whenever
//! the node is marked dirty.

mod decode;
mod encode;
mod merkle;
mod parallel;

pub use merkle::{merkle_value, merkle_value_root};
pub use parallel::{Token, TokenPool};

use crate::model::Hash;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Number of child slots on a branch
pub const CHILDREN_CAPACITY: usize = 16;

/// Values longer than this are stored by hash under [`StateVersion::V1`]
pub const MAX_INLINE_VALUE: usize = 32;

/// Storage layout version
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateVersion {
    /// Every value is encoded inline
    V0,
    /// Values over [`MAX_INLINE_VALUE`] bytes are encoded by hash
    #[default]
    V1,
}

impl StateVersion {
    /// Largest value length still encoded inline, `None` when unbounded
    pub fn max_inline_value(self) -> Option<usize> {
        match self {
            StateVersion::V0 => None,
            StateVersion::V1 => Some(MAX_INLINE_VALUE),
        }
    }

    /// True if a value of `len` bytes is written by hash
    pub fn hashes_value(self, len: usize) -> bool {
        self.max_inline_value().is_some_and(|max| len > max)
    }
}

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateVersion::V0 => write!(f, "v0"),
            StateVersion::V1 => write!(f, "v1"),
        }
    }
}

impl FromStr for StateVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v0" | "0" => Ok(StateVersion::V0),
            "v1" | "1" => Ok(StateVersion::V1),
            other => Err(format!("unknown state version: {}", other)),
        }
    }
}

/// A storage value held by a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageValue {
    /// The value bytes themselves
    Inline(Vec<u8>),
    /// A value referenced by its hash; `value` is set once it has been
    /// resolved from a database or a proof.
    Hashed { hash: Hash, value: Option<Vec<u8>> },
}

impl StorageValue {
    /// The value bytes, if known
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            StorageValue::Inline(value) => Some(value),
            StorageValue::Hashed { value, .. } => value.as_deref(),
        }
    }

    /// The hash this value is encoded as under `version`, or `None` when it
    /// is encoded inline.
    pub fn encoded_hash(&self, version: StateVersion) -> Option<Hash> {
        match self {
            StorageValue::Inline(value) if version.hashes_value(value.len()) => {
                Some(Hash::digest(value))
            }
            StorageValue::Inline(_) => None,
            StorageValue::Hashed { hash, .. } => Some(*hash),
        }
    }

    pub fn is_inlined(&self, version: StateVersion) -> bool {
        self.encoded_hash(version).is_none()
    }
}

/// A child slot entry
#[derive(Clone, Debug)]
pub enum Child {
    /// A decoded node
    Node(Arc<Node>),
    /// A node known only by its hash
    Hash(Hash),
}

impl Child {
    pub fn as_node(&self) -> Option<&Arc<Node>> {
        match self {
            Child::Node(node) => Some(node),
            Child::Hash(_) => None,
        }
    }

    /// Nodes counted for this child by its parent's `descendants`
    pub fn subtree_size(&self) -> u32 {
        match self {
            Child::Node(node) => 1 + node.descendants(),
            Child::Hash(_) => 1,
        }
    }
}

impl From<Node> for Child {
    fn from(node: Node) -> Self {
        Child::Node(Arc::new(node))
    }
}

/// Branch-only state
#[derive(Clone, Debug, Default)]
pub struct Branch {
    pub children: [Option<Child>; CHILDREN_CAPACITY],
    /// Number of nodes below this branch, at any depth
    pub descendants: u32,
}

impl Branch {
    /// Bit `i` is set iff child slot `i` is occupied
    pub fn children_bitmap(&self) -> u16 {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_some())
            .fold(0u16, |bitmap, (i, _)| bitmap | (1 << i))
    }

    pub fn num_children(&self) -> usize {
        self.children.iter().filter(|child| child.is_some()).count()
    }

    /// Recompute `descendants` from the current children
    pub fn update_descendants(&mut self) {
        self.descendants = self
            .children
            .iter()
            .flatten()
            .map(Child::subtree_size)
            .sum();
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Leaf,
    Branch(Box<Branch>),
}

#[derive(Clone, Debug, Default)]
struct VersionCache {
    encoding: OnceCell<Vec<u8>>,
    merkle_value: OnceCell<Vec<u8>>,
}

/// Memoized outputs, one slot per state version
#[derive(Clone, Debug, Default)]
struct NodeCache {
    v0: VersionCache,
    v1: VersionCache,
}

impl NodeCache {
    fn slot(&self, version: StateVersion) -> &VersionCache {
        match version {
            StateVersion::V0 => &self.v0,
            StateVersion::V1 => &self.v1,
        }
    }
}

/// A trie node
#[derive(Clone, Debug)]
pub struct Node {
    /// Partial key in nibbles
    pub(crate) partial_key: Vec<u8>,
    pub(crate) value: Option<StorageValue>,
    pub(crate) kind: NodeKind,
    /// Snapshot epoch that last touched this node
    pub generation: u64,
    /// Modified since it was last persisted
    pub dirty: bool,
    cache: NodeCache,
}

impl Node {
    /// A new leaf holding `value` inline
    pub fn new_leaf(partial_key: Vec<u8>, value: Vec<u8>) -> Self {
        Node {
            partial_key,
            value: Some(StorageValue::Inline(value)),
            kind: NodeKind::Leaf,
            generation: 0,
            dirty: true,
            cache: NodeCache::default(),
        }
    }

    /// A new branch without children
    pub fn new_branch(partial_key: Vec<u8>, value: Option<Vec<u8>>) -> Self {
        Node {
            partial_key,
            value: value.map(StorageValue::Inline),
            kind: NodeKind::Branch(Box::default()),
            generation: 0,
            dirty: true,
            cache: NodeCache::default(),
        }
    }

    /// Builder helper placing `child` in slot `index`
    pub fn with_child(mut self, index: usize, child: impl Into<Child>) -> Self {
        self.set_child(index, Some(child.into()));
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Partial key in nibbles
    pub fn partial_key(&self) -> &[u8] {
        &self.partial_key
    }

    pub fn value(&self) -> Option<&StorageValue> {
        self.value.as_ref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Replace the partial key and mark the node dirty
    pub fn set_partial_key(&mut self, partial_key: Vec<u8>) {
        self.partial_key = partial_key;
        self.set_dirty();
    }

    /// Replace the storage value and mark the node dirty
    pub fn set_value(&mut self, value: Option<StorageValue>) {
        self.value = value;
        self.set_dirty();
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch(_))
    }

    pub fn branch(&self) -> Option<&Branch> {
        match &self.kind {
            NodeKind::Branch(branch) => Some(branch),
            NodeKind::Leaf => None,
        }
    }

    pub(crate) fn branch_mut(&mut self) -> Option<&mut Branch> {
        match &mut self.kind {
            NodeKind::Branch(branch) => Some(branch),
            NodeKind::Leaf => None,
        }
    }

    /// Child in slot `index`, always `None` for a leaf
    pub fn child(&self, index: usize) -> Option<&Child> {
        self.branch()
            .and_then(|branch| branch.children.get(index))
            .and_then(Option::as_ref)
    }

    /// Replace the child in slot `index` and refresh `descendants`
    ///
    /// Setting a child on a leaf turns it into a branch.
    pub fn set_child(&mut self, index: usize, child: Option<Child>) {
        if self.is_leaf() {
            self.kind = NodeKind::Branch(Box::default());
        }
        if let Some(branch) = self.branch_mut() {
            branch.children[index] = child;
            branch.update_descendants();
        }
        self.set_dirty();
    }

    /// Take the child out of slot `index`, leaving it empty
    pub(crate) fn take_child(&mut self, index: usize) -> Option<Child> {
        self.branch_mut()
            .and_then(|branch| branch.children[index].take())
    }

    pub fn children_bitmap(&self) -> u16 {
        self.branch().map_or(0, Branch::children_bitmap)
    }

    pub fn num_children(&self) -> usize {
        self.branch().map_or(0, Branch::num_children)
    }

    pub fn descendants(&self) -> u32 {
        self.branch().map_or(0, |branch| branch.descendants)
    }

    /// The value bytes, `None` if absent or not yet resolved
    pub fn storage_value(&self) -> Option<&[u8]> {
        self.value.as_ref().and_then(StorageValue::bytes)
    }

    /// Mark the node modified and drop its memoized encoding and Merkle value
    pub fn set_dirty(&mut self) {
        self.dirty = true;
        self.cache = NodeCache::default();
    }

    /// Mark the node persisted; memoized outputs are kept
    pub fn set_clean(&mut self) {
        self.dirty = false;
    }
}

impl PartialEq for Node {
    /// Structural equality over the encoded fields; bookkeeping (generation,
    /// dirtiness, caches) is ignored.
    fn eq(&self, other: &Self) -> bool {
        if self.partial_key != other.partial_key || self.value != other.value {
            return false;
        }
        match (&self.kind, &other.kind) {
            (NodeKind::Leaf, NodeKind::Leaf) => true,
            (NodeKind::Branch(a), NodeKind::Branch(b)) => {
                a.descendants == b.descendants
                    && a.children.iter().zip(b.children.iter()).all(|pair| match pair {
                        (None, None) => true,
                        (Some(Child::Hash(x)), Some(Child::Hash(y))) => x == y,
                        (Some(Child::Node(x)), Some(Child::Node(y))) => x == y,
                        _ => false,
                    })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_version_threshold() {
        assert!(!StateVersion::V0.hashes_value(1000));
        assert!(!StateVersion::V1.hashes_value(32));
        assert!(StateVersion::V1.hashes_value(33));
        assert_eq!("V0".parse::<StateVersion>().unwrap(), StateVersion::V0);
        assert!("v2".parse::<StateVersion>().is_err());
    }

    #[test]
    fn test_storage_value_encoded_hash() {
        let short = StorageValue::Inline(vec![1; 32]);
        let long = StorageValue::Inline(vec![1; 33]);
        assert_eq!(short.encoded_hash(StateVersion::V1), None);
        assert_eq!(
            long.encoded_hash(StateVersion::V1),
            Some(Hash::digest(&[1; 33]))
        );
        assert_eq!(long.encoded_hash(StateVersion::V0), None);

        let hashed = StorageValue::Hashed {
            hash: Hash::digest(b"v"),
            value: None,
        };
        assert_eq!(hashed.encoded_hash(StateVersion::V0), Some(Hash::digest(b"v")));
        assert_eq!(hashed.bytes(), None);
    }

    #[test]
    fn test_children_bitmap_and_descendants() {
        let grandchild = Node::new_leaf(vec![1], vec![1]);
        let child = Node::new_branch(vec![], None).with_child(0, grandchild);
        let node = Node::new_branch(vec![], None)
            .with_child(2, child)
            .with_child(10, Child::Hash(Hash::digest(b"x")));

        assert_eq!(node.children_bitmap(), (1 << 2) | (1 << 10));
        assert_eq!(node.num_children(), 2);
        // child + grandchild + placeholder
        assert_eq!(node.descendants(), 3);
    }

    #[test]
    fn test_set_child_promotes_leaf() {
        let mut node = Node::new_leaf(vec![], vec![1]);
        node.set_child(3, Some(Node::new_leaf(vec![], vec![2]).into()));
        assert!(node.is_branch());
        assert_eq!(node.storage_value(), Some(&[1u8][..]));
        assert_eq!(node.children_bitmap(), 1 << 3);
    }

    #[test]
    fn test_set_dirty_clears_cache() {
        let mut node = Node::new_leaf(vec![1], vec![2]);
        node.set_clean();
        assert_eq!(node.encoding(StateVersion::V1).unwrap(), &[65, 1, 4, 2]);
        node.set_value(Some(StorageValue::Inline(vec![3])));
        assert!(node.dirty);
        assert_eq!(node.encoding(StateVersion::V1).unwrap(), &[65, 1, 4, 3]);

        node.set_clean();
        node.set_partial_key(vec![1, 2]);
        assert!(node.dirty);
        assert_eq!(node.encoding(StateVersion::V1).unwrap(), &[66, 0x12, 4, 3]);
    }

    #[test]
    fn test_encoding_cached_per_version() {
        let node = Node::new_leaf(vec![], vec![5; 40]);
        let v1 = node.encoding(StateVersion::V1).unwrap().to_vec();
        let v0 = node.encoding(StateVersion::V0).unwrap().to_vec();

        assert_ne!(v0, v1);
        assert_eq!(v1[0], 0b0010_0000);
        assert_eq!(v0[0], 0b0100_0000);
        assert_eq!(node.encoding(StateVersion::V1).unwrap(), &v1[..]);
        assert_ne!(
            node.merkle_value(StateVersion::V0).unwrap(),
            node.merkle_value(StateVersion::V1).unwrap()
        );
    }
}
