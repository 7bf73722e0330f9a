//! Proof generation

use crate::codec::key_le_to_nibbles;
use crate::error::ProofError;
use crate::model::Hash;
use crate::node::{Child, Node, StorageValue};
use crate::store::Database;
use crate::trie::EMPTY_TRIE_HASH;
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

/// Collected proof entries, deduplicated by hash in first-seen order
#[derive(Default)]
struct ProofNodes {
    seen: HashSet<Hash>,
    encodings: Vec<Vec<u8>>,
}

impl ProofNodes {
    fn add(&mut self, hash: Hash, encoding: Vec<u8>) {
        if self.seen.insert(hash) {
            self.encodings.push(encoding);
        }
    }
}

/// Build a proof for `keys` against the trie rooted at `root`
///
/// Nodes are read from `db` by hash as the walks reach them.
pub fn generate<K, D>(root: Hash, keys: &[K], db: &D) -> Result<Vec<Vec<u8>>>
where
    K: AsRef<[u8]>,
    D: Database + ?Sized,
{
    let mut proof = ProofNodes::default();

    let root_node = if root == *EMPTY_TRIE_HASH {
        None
    } else {
        let encoding = db.get(root.as_bytes())?.ok_or_else(|| ProofError::LoadingTrie {
            root: root.to_string(),
        })?;
        let node = decode_node(root, &encoding)?;
        proof.add(root, encoding);
        Some(node)
    };

    for key in keys {
        let key = key.as_ref();
        let not_found = || {
            Error::from(ProofError::KeyNotFound {
                key: format!("0x{}", hex::encode(key)),
            })
        };

        let Some(root_node) = root_node.as_ref() else {
            return Err(not_found());
        };
        let nibbles = key_le_to_nibbles(key);
        if !walk(root_node, &nibbles, key, db, &mut proof)? {
            return Err(not_found());
        }
    }

    debug!(%root, keys = keys.len(), nodes = proof.encodings.len(), "generated proof");
    Ok(proof.encodings)
}

/// Walk from `node` towards `key`, recording every node read from `db`.
/// Returns false when the key is not in the trie.
fn walk<D: Database + ?Sized>(
    node: &Node,
    key: &[u8],
    full_key: &[u8],
    db: &D,
    proof: &mut ProofNodes,
) -> Result<bool> {
    if key.is_empty() || node.partial_key == key {
        if node.partial_key == key {
            add_hashed_value(node, db, proof)?;
        }
        return Ok(true);
    }

    let key_len = node.partial_key.len();
    if node.is_leaf() || key.len() <= key_len || !key.starts_with(&node.partial_key) {
        return Ok(false);
    }

    let rest = &key[key_len + 1..];
    match node.child(usize::from(key[key_len])) {
        None => Ok(false),
        Some(Child::Node(child)) => walk(child, rest, full_key, db, proof),
        Some(Child::Hash(hash)) => {
            let encoding = db.get(hash.as_bytes())?.ok_or_else(|| ProofError::MissingChild {
                hash: hash.to_string(),
                key: format!("0x{}", hex::encode(full_key)),
            })?;
            let child = decode_node(*hash, &encoding)?;
            proof.add(*hash, encoding);
            walk(&child, rest, full_key, db, proof)
        }
    }
}

fn decode_node(hash: Hash, encoding: &[u8]) -> Result<Node> {
    Node::decode(encoding).map_err(|source| {
        ProofError::DecodeNode {
            hash: hash.to_string(),
            source,
        }
        .into()
    })
}

fn add_hashed_value<D: Database + ?Sized>(node: &Node, db: &D, proof: &mut ProofNodes) -> Result<()> {
    if let Some(StorageValue::Hashed { hash, .. }) = &node.value {
        let value = db.get(hash.as_bytes())?.ok_or(Error::MissingValue(*hash))?;
        proof.add(*hash, value);
    }
    Ok(())
}
