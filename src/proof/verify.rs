//! Proof verification

use super::bytes_to_string;
use crate::error::ProofError;
use crate::model::Hash;
use crate::node::{merkle_value_root, Child, Node, StateVersion, StorageValue};
use crate::store::{MemoryDB, EMPTY_PREFIX};
use crate::trie::Trie;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Check that `key` is in the trie rooted at `root` according to `proof`
///
/// When `expected` is non-empty the proven value must equal it.
pub fn verify<B: AsRef<[u8]>>(proof: &[B], root: Hash, key: &[u8], expected: &[u8]) -> Result<()> {
    let trie = build_trie(proof, root)?;

    let value = trie.get(key).ok_or_else(|| ProofError::KeyNotFoundInProofTrie {
        key: bytes_to_string(Some(key)),
        root: root.to_string(),
    })?;

    if !expected.is_empty() && expected != value.as_slice() {
        return Err(ProofError::ValueMismatchProofTrie {
            expected: bytes_to_string(Some(expected)),
            actual: bytes_to_string(Some(&value)),
        }
        .into());
    }

    debug!(%root, key = %bytes_to_string(Some(key)), "verified proof");
    Ok(())
}

/// Rebuild the part of the trie covered by `proof`
fn build_trie<B: AsRef<[u8]>>(proof: &[B], root: Hash) -> Result<Trie> {
    if proof.is_empty() {
        return Err(ProofError::EmptyProof.into());
    }

    let blobs: Vec<&[u8]> = proof.iter().map(|blob| blob.as_ref()).collect();
    let db: MemoryDB = MemoryDB::from_blobs(&blobs);

    // Every listed node is addressed by hash, the root included even when
    // its encoding is short enough to be inlined as a child.
    let Some(encoding) = blobs
        .iter()
        .copied()
        .find(|encoding| merkle_value_root(encoding) == root)
    else {
        let digests: Vec<String> = blobs
            .iter()
            .map(|encoding| merkle_value_root(encoding).to_string())
            .collect();
        return Err(ProofError::RootNodeNotFound {
            root: root.to_string(),
            digests: digests.join(", "),
        }
        .into());
    };

    let root_node = load_proof(&db, decode_node(root, encoding)?)?;
    Ok(Trie::from_root(root_node, StateVersion::default()))
}

/// Resolve placeholders and hashed values of `node` from the proof blobs.
/// Children missing from the proof stay placeholders.
fn load_proof(db: &MemoryDB, mut node: Node) -> Result<Node> {
    if let Some(StorageValue::Hashed { hash, value }) = node.value.as_mut() {
        if value.is_none() {
            *value = db.get(hash.as_bytes(), EMPTY_PREFIX)?;
        }
    }

    if let Some(branch) = node.branch_mut() {
        for slot in branch.children.iter_mut() {
            let child = match slot.take() {
                Some(Child::Hash(hash)) => match db.get(hash.as_bytes(), EMPTY_PREFIX)? {
                    Some(encoding) => load_proof(db, decode_node(hash, &encoding)?)?,
                    None => {
                        *slot = Some(Child::Hash(hash));
                        continue;
                    }
                },
                Some(Child::Node(child)) => load_proof(db, Arc::unwrap_or_clone(child))?,
                None => continue,
            };
            *slot = Some(Child::Node(Arc::new(child)));
        }
        branch.update_descendants();
    }
    Ok(node)
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
