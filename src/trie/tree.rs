//! Trie mutations
//!
//! Every mutation rebuilds the path from the root to the touched key and
//! leaves the rest of the trie shared. Walks that would have to descend
//! into a child known only by hash fail with [`Error::UnresolvedNode`].

use super::Trie;
use crate::codec::{common_prefix_len, key_le_to_nibbles, nibbles_to_hex};
use crate::node::{Child, Node, NodeKind, StorageValue, CHILDREN_CAPACITY};
use crate::{Error, Result};
use std::sync::Arc;

impl Trie {
    /// Insert or overwrite the value stored under `key`
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let nibbles = key_le_to_nibbles(key);
        let root = self.root.take();
        let result = self.insert(root.clone(), &nibbles, &nibbles, value);
        match result {
            Ok((root, _)) => {
                self.root = Some(root);
                Ok(())
            }
            Err(err) => {
                self.root = root;
                Err(err)
            }
        }
    }

    /// Remove `key`, returning whether a value was removed
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let nibbles = key_le_to_nibbles(key);
        let root = self.root.take();
        match self.remove(root.clone(), &nibbles, &nibbles) {
            Ok((root, deleted)) => {
                self.root = root;
                Ok(deleted)
            }
            Err(err) => {
                self.root = root;
                Err(err)
            }
        }
    }

    /// Remove every key starting with `prefix`
    pub fn clear_prefix(&mut self, prefix: &[u8]) -> Result<()> {
        if prefix.is_empty() {
            self.root = None;
            return Ok(());
        }

        let nibbles = key_le_to_nibbles(prefix);
        let root = self.root.take();
        match self.clear(root.clone(), &nibbles, &nibbles) {
            Ok((root, _)) => {
                self.root = root;
                Ok(())
            }
            Err(err) => {
                self.root = root;
                Err(err)
            }
        }
    }

    fn new_leaf(&self, partial_key: &[u8], value: Vec<u8>) -> Node {
        Node::new_leaf(partial_key.to_vec(), value).with_generation(self.generation)
    }

    fn new_branch(&self, partial_key: &[u8]) -> Node {
        Node::new_branch(partial_key.to_vec(), None).with_generation(self.generation)
    }

    /// Insert `value` at `key` below `parent`, returning the new subtree root
    /// and whether anything changed.
    fn insert(
        &self,
        parent: Option<Arc<Node>>,
        key: &[u8],
        full_key: &[u8],
        value: Vec<u8>,
    ) -> Result<(Arc<Node>, bool)> {
        let Some(parent) = parent else {
            return Ok((Arc::new(self.new_leaf(key, value)), true));
        };

        if parent.partial_key == key {
            if parent.storage_value() == Some(value.as_slice()) {
                return Ok((parent, false));
            }
            let mut node = self.prepare(parent);
            node.value = Some(StorageValue::Inline(value));
            node.set_dirty();
            return Ok((Arc::new(node), true));
        }

        let common = common_prefix_len(key, &parent.partial_key);

        if common == parent.partial_key.len() {
            // The key continues below this node; a leaf gains its first child
            // and becomes a branch.
            let index = usize::from(key[common]);
            let child = match parent.child(index) {
                None => None,
                Some(Child::Node(child)) => Some(Arc::clone(child)),
                Some(Child::Hash(_)) => {
                    return Err(Error::UnresolvedNode(nibbles_to_hex(full_key)));
                }
            };

            let (child, mutated) = self.insert(child, &key[common + 1..], full_key, value)?;
            if !mutated {
                return Ok((parent, false));
            }
            let mut node = self.prepare(parent);
            node.set_child(index, Some(Child::Node(child)));
            return Ok((Arc::new(node), true));
        }

        // The keys diverge inside the existing partial key: split it under a
        // new branch holding the common part.
        let mut branch = self.new_branch(&key[..common]);

        let old_index = usize::from(parent.partial_key[common]);
        let mut old = self.prepare(parent);
        old.partial_key = old.partial_key[common + 1..].to_vec();
        old.set_dirty();

        if common == key.len() {
            branch.value = Some(StorageValue::Inline(value));
        } else {
            let new_index = usize::from(key[common]);
            let leaf = self.new_leaf(&key[common + 1..], value);
            branch.set_child(new_index, Some(leaf.into()));
        }
        branch.set_child(old_index, Some(old.into()));

        Ok((Arc::new(branch), true))
    }

    /// Remove `key` below `parent`, returning the new subtree root and whether
    /// a value was removed.
    fn remove(
        &self,
        parent: Option<Arc<Node>>,
        key: &[u8],
        full_key: &[u8],
    ) -> Result<(Option<Arc<Node>>, bool)> {
        let Some(parent) = parent else {
            return Ok((None, false));
        };

        if parent.is_leaf() {
            if parent.partial_key == key {
                return Ok((None, true));
            }
            return Ok((Some(parent), false));
        }

        if parent.partial_key == key {
            if parent.value.is_none() {
                return Ok((Some(parent), false));
            }
            let mut node = self.prepare(parent);
            node.value = None;
            node.set_dirty();
            return Ok((self.handle_deletion(node, full_key)?.map(Arc::new), true));
        }

        if key.len() <= parent.partial_key.len() || !key.starts_with(&parent.partial_key) {
            return Ok((Some(parent), false));
        }

        let index = usize::from(key[parent.partial_key.len()]);
        let child = match parent.child(index) {
            None => return Ok((Some(parent), false)),
            Some(Child::Node(child)) => Arc::clone(child),
            Some(Child::Hash(_)) => return Err(Error::UnresolvedNode(nibbles_to_hex(full_key))),
        };

        let rest = &key[parent.partial_key.len() + 1..];
        let (child, deleted) = self.remove(Some(child), rest, full_key)?;
        if !deleted {
            return Ok((Some(parent), false));
        }

        let mut node = self.prepare(parent);
        node.set_child(index, child.map(Child::Node));
        Ok((self.handle_deletion(node, full_key)?.map(Arc::new), true))
    }

    /// Remove every key below `parent` starting with `prefix`
    fn clear(
        &self,
        parent: Option<Arc<Node>>,
        prefix: &[u8],
        full_prefix: &[u8],
    ) -> Result<(Option<Arc<Node>>, bool)> {
        let Some(parent) = parent else {
            return Ok((None, false));
        };

        if parent.partial_key.starts_with(prefix) {
            return Ok((None, true));
        }

        let key_len = parent.partial_key.len();
        if parent.is_leaf() || prefix.len() <= key_len || !prefix.starts_with(&parent.partial_key) {
            return Ok((Some(parent), false));
        }

        let index = usize::from(prefix[key_len]);
        let rest = &prefix[key_len + 1..];
        let child = match parent.child(index) {
            None => return Ok((Some(parent), false)),
            // A placeholder matched in full can go without being resolved.
            Some(Child::Hash(_)) if rest.is_empty() => None,
            Some(Child::Hash(_)) => {
                return Err(Error::UnresolvedNode(nibbles_to_hex(full_prefix)));
            }
            Some(Child::Node(child)) => {
                let (child, cleared) = self.clear(Some(Arc::clone(child)), rest, full_prefix)?;
                if !cleared {
                    return Ok((Some(parent), false));
                }
                child
            }
        };

        let mut node = self.prepare(parent);
        node.set_child(index, child.map(Child::Node));
        Ok((self.handle_deletion(node, full_prefix)?.map(Arc::new), true))
    }

    /// Restore branch invariants after a value or child was removed
    ///
    /// A branch with neither children nor value disappears, one with only a
    /// value becomes a leaf, and one with a single child and no value is
    /// merged into that child.
    fn handle_deletion(&self, mut node: Node, full_key: &[u8]) -> Result<Option<Node>> {
        match (node.num_children(), node.value.is_some()) {
            (0, false) => Ok(None),
            (0, true) => {
                node.kind = NodeKind::Leaf;
                node.set_dirty();
                Ok(Some(node))
            }
            (1, false) => {
                let Some(index) = (0..CHILDREN_CAPACITY).find(|&i| node.child(i).is_some()) else {
                    return Ok(Some(node));
                };
                let child = match node.take_child(index) {
                    Some(Child::Node(child)) => child,
                    _ => return Err(Error::UnresolvedNode(nibbles_to_hex(full_key))),
                };

                let mut merged = self.prepare(child);
                let mut partial_key = std::mem::take(&mut node.partial_key);
                partial_key.push(index as u8);
                partial_key.extend_from_slice(&merged.partial_key);
                merged.partial_key = partial_key;
                merged.set_dirty();
                Ok(Some(merged))
            }
            _ => Ok(Some(node)),
        }
    }
}
