//! Loading a trie from a database and writing it back
//!
//! Nodes are stored under the Blake2b-256 hash of their encoding. Only nodes
//! whose encoding is at least 32 bytes get an entry of their own; smaller
//! ones live inlined in their parent. The root is always stored. Hashed
//! storage values are stored under their hash next to the nodes.

use super::{Trie, EMPTY_TRIE_HASH};
use crate::model::{Hash, HASH_LENGTH};
use crate::node::{Child, Node, StateVersion, StorageValue};
use crate::store::Database;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

impl Trie {
    /// Load the trie rooted at `root` from `db`, resolving every node and
    /// every hashed value.
    pub fn load<D: Database + ?Sized>(db: &D, root: Hash, version: StateVersion) -> Result<Trie> {
        if root == *EMPTY_TRIE_HASH {
            return Ok(Trie::new(version));
        }

        let node = load_node(db, root)?;
        debug!(%root, descendants = node.descendants(), "loaded trie");
        Ok(Trie::from_root(node, version))
    }

    /// Write every dirty node to `db` and mark the trie clean
    pub fn write_dirty<D: Database + ?Sized>(&mut self, db: &D) -> Result<()> {
        let version = self.version;
        let Some(root) = self.root.as_mut() else {
            return Ok(());
        };

        let mut written = 0usize;
        write_dirty_node(db, Arc::make_mut(root), version, true, &mut written)?;
        debug!(written, "persisted dirty nodes");
        Ok(())
    }

    /// Write every node to `db`, dirty or not
    pub fn store<D: Database + ?Sized>(&self, db: &D) -> Result<()> {
        let Some(root) = self.root.as_deref() else {
            return Ok(());
        };

        let mut written = 0usize;
        store_node(db, root, self.version, true, &mut written)?;
        debug!(written, "stored trie");
        Ok(())
    }
}

fn load_node<D: Database + ?Sized>(db: &D, hash: Hash) -> Result<Node> {
    let encoding = db.get(hash.as_bytes())?.ok_or(Error::MissingNode(hash))?;
    let node = Node::decode(&encoding)?;
    resolve(db, node)
}

/// Replace placeholders below `node` with nodes from `db` and fill in hashed
/// values. Cached encodings are kept, so the node re-encodes to the bytes it
/// was read from.
fn resolve<D: Database + ?Sized>(db: &D, mut node: Node) -> Result<Node> {
    if let Some(StorageValue::Hashed { hash, value }) = node.value.as_mut() {
        if value.is_none() {
            *value = Some(db.get(hash.as_bytes())?.ok_or(Error::MissingValue(*hash))?);
        }
    }

    if let Some(branch) = node.branch_mut() {
        for slot in branch.children.iter_mut() {
            let resolved = match slot.take() {
                None => continue,
                Some(Child::Hash(hash)) => load_node(db, hash)?,
                Some(Child::Node(child)) => resolve(db, Arc::unwrap_or_clone(child))?,
            };
            *slot = Some(Child::Node(Arc::new(resolved)));
        }
        branch.update_descendants();
    }

    node.set_clean();
    Ok(node)
}

/// Put `node` under its hash unless it is small enough to be inlined
fn put_node<D: Database + ?Sized>(
    db: &D,
    node: &Node,
    version: StateVersion,
    is_root: bool,
    written: &mut usize,
) -> Result<()> {
    if let Some(value) = &node.value {
        if let (Some(hash), Some(bytes)) = (value.encoded_hash(version), value.bytes()) {
            db.put(hash.as_bytes(), bytes)?;
        }
    }

    let encoding = node.encoding(version)?;
    if is_root || encoding.len() >= HASH_LENGTH {
        db.put(Hash::digest(encoding).as_bytes(), encoding)?;
        *written += 1;
    }
    Ok(())
}

fn write_dirty_node<D: Database + ?Sized>(
    db: &D,
    node: &mut Node,
    version: StateVersion,
    is_root: bool,
    written: &mut usize,
) -> Result<()> {
    // Clean nodes only ever sit under clean parents.
    if !node.dirty {
        return Ok(());
    }

    if let Some(branch) = node.branch_mut() {
        for child in branch.children.iter_mut().flatten() {
            if let Child::Node(child) = child {
                if child.dirty {
                    write_dirty_node(db, Arc::make_mut(child), version, false, written)?;
                }
            }
        }
    }

    put_node(db, node, version, is_root, written)?;
    node.set_clean();
    Ok(())
}

fn store_node<D: Database + ?Sized>(
    db: &D,
    node: &Node,
    version: StateVersion,
    is_root: bool,
    written: &mut usize,
) -> Result<()> {
    if let Some(branch) = node.branch() {
        for child in branch.children.iter().flatten() {
            if let Child::Node(child) = child {
                store_node(db, child, version, false, written)?;
            }
        }
    }
    put_node(db, node, version, is_root, written)
}
