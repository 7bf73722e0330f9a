//! Node decoding

use super::{Branch, Child, Node, NodeKind, StorageValue};
use crate::codec::{decode_header, key_le_to_nibbles, read_length_prefixed, ByteReader, Variant};
use crate::error::DecodeError;
use crate::model::{Hash, HASH_LENGTH};

type DecodeResult<T> = std::result::Result<T, DecodeError>;

impl Node {
    /// Decode a complete node encoding
    ///
    /// The decoded node is clean and remembers `encoding` as its own. Children
    /// referenced by hash come back as [`Child::Hash`] placeholders; children
    /// short enough to be inlined are decoded recursively.
    pub fn decode(encoding: &[u8]) -> DecodeResult<Node> {
        let mut reader = ByteReader::new(encoding);
        let node = decode_node(&mut reader)?;
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes {
                trailing: reader.remaining(),
            });
        }
        Ok(node)
    }
}

fn decode_node(r: &mut ByteReader<'_>) -> DecodeResult<Node> {
    let start = r.offset();
    let (variant, key_length) = decode_header(r)?;
    if variant == Variant::Empty {
        return Err(DecodeError::EmptyNode);
    }

    let partial_key =
        decode_partial_key(r, key_length).map_err(|err| DecodeError::ReadPartialKey(Box::new(err)))?;

    let node = if variant.is_branch() {
        decode_branch(r, variant, partial_key)?
    } else {
        decode_leaf(r, variant, partial_key)?
    };

    Ok(node.with_cached_encoding(r.consumed_since(start)))
}

fn decode_partial_key(r: &mut ByteReader<'_>, key_length: usize) -> DecodeResult<Vec<u8>> {
    if key_length == 0 {
        return Ok(Vec::new());
    }
    let packed = r.read_bytes((key_length + 1) / 2)?;
    let nibbles = key_le_to_nibbles(packed);
    Ok(nibbles[key_length % 2..].to_vec())
}

fn decode_value(r: &mut ByteReader<'_>, variant: Variant) -> DecodeResult<StorageValue> {
    let value = if variant.has_hashed_value() {
        r.read_array::<HASH_LENGTH>().map(|bytes| StorageValue::Hashed {
            hash: Hash::from_bytes(bytes),
            value: None,
        })
    } else {
        read_length_prefixed(r).map(|bytes| StorageValue::Inline(bytes.to_vec()))
    };
    value.map_err(|err| DecodeError::DecodeValue(Box::new(err)))
}

fn decode_leaf(r: &mut ByteReader<'_>, variant: Variant, partial_key: Vec<u8>) -> DecodeResult<Node> {
    // A leaf whose encoding ends after the key carries no value.
    let value = if r.is_empty() {
        None
    } else {
        Some(decode_value(r, variant)?)
    };

    Ok(Node {
        partial_key,
        value,
        kind: NodeKind::Leaf,
        generation: 0,
        dirty: false,
        cache: Default::default(),
    })
}

fn decode_branch(
    r: &mut ByteReader<'_>,
    variant: Variant,
    partial_key: Vec<u8>,
) -> DecodeResult<Node> {
    let bitmap = r
        .read_array::<2>()
        .map(u16::from_le_bytes)
        .map_err(|err| DecodeError::ReadChildrenBitmap(Box::new(err)))?;

    let value = if variant.has_value() {
        Some(decode_value(r, variant)?)
    } else {
        None
    };

    let mut branch = Branch::default();
    for index in 0..branch.children.len() {
        if bitmap & (1 << index) == 0 {
            continue;
        }
        let slot = index as u8;

        let merkle_value = read_length_prefixed(r).map_err(|err| DecodeError::DecodeChildHash {
            index: slot,
            source: Box::new(err),
        })?;

        let child = if merkle_value.len() < HASH_LENGTH {
            let child = Node::decode(merkle_value).map_err(|err| DecodeError::DecodeInlinedChild {
                index: slot,
                source: Box::new(err),
            })?;
            Child::Node(child.into())
        } else {
            let hash = Hash::from_slice(merkle_value).ok_or_else(|| DecodeError::DecodeChildHash {
                index: slot,
                source: Box::new(DecodeError::InvalidHashLength {
                    length: merkle_value.len(),
                }),
            })?;
            Child::Hash(hash)
        };

        branch.descendants += child.subtree_size();
        branch.children[index] = Some(child);
    }

    Ok(Node {
        partial_key,
        value,
        kind: NodeKind::Branch(Box::new(branch)),
        generation: 0,
        dirty: false,
        cache: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StateVersion;
    use crate::trie::Trie;
    use proptest::prelude::*;

    fn encode(node: &Node) -> Vec<u8> {
        let mut out = Vec::new();
        node.encode(StateVersion::V1, &mut out).unwrap();
        out
    }

    #[test]
    fn test_decode_leaf() {
        let node = Node::decode(&[65, 1, 4, 2]).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.partial_key, vec![1]);
        assert_eq!(node.storage_value(), Some(&[2u8][..]));
        assert!(!node.dirty);
    }

    #[test]
    fn test_decode_leaf_odd_key() {
        let node = Node::decode(&[0x43, 0x01, 0x23, 0x00]).unwrap();
        assert_eq!(node.partial_key, vec![1, 2, 3]);
        assert_eq!(node.storage_value(), Some(&[][..]));
    }

    #[test]
    fn test_decode_leaf_without_value() {
        let node = Node::decode(&[0x41, 0x09]).unwrap();
        assert_eq!(node.partial_key, vec![9]);
        assert!(node.value.is_none());
    }

    #[test]
    fn test_decode_leaf_truncated_value() {
        let err = Node::decode(&[0x41, 0x09, 12, 1]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot decode storage value: unexpected end of input at offset 3: need 2 more byte(s)"
        );
    }

    #[test]
    fn test_decode_hashed_leaf() {
        let hash = Hash::digest(b"value");
        let mut encoding = vec![0x21, 0x05];
        encoding.extend_from_slice(hash.as_bytes());

        let node = Node::decode(&encoding).unwrap();
        assert_eq!(
            node.value,
            Some(StorageValue::Hashed { hash, value: None })
        );
        assert_eq!(node.storage_value(), None);
        assert_eq!(node.encoding(StateVersion::V0).unwrap(), &encoding[..]);
    }

    #[test]
    fn test_decode_branch_with_inlined_child() {
        let node = Node::decode(&[193, 1, 4, 0, 4, 2, 16, 65, 5, 4, 6]).unwrap();
        assert!(node.is_branch());
        assert_eq!(node.partial_key, vec![1]);
        assert_eq!(node.storage_value(), Some(&[2u8][..]));
        assert_eq!(node.children_bitmap(), 1 << 2);
        assert_eq!(node.descendants(), 1);

        let child = node.child(2).and_then(Child::as_node).unwrap();
        assert_eq!(child.partial_key, vec![5]);
        assert_eq!(child.storage_value(), Some(&[6u8][..]));
    }

    #[test]
    fn test_decode_branch_with_hash_child() {
        let hash = Hash::digest(b"child");
        let mut encoding = vec![0x80, 0x00, 0x04, 128];
        encoding.extend_from_slice(hash.as_bytes());

        let node = Node::decode(&encoding).unwrap();
        assert!(node.value.is_none());
        assert!(matches!(node.child(10), Some(Child::Hash(h)) if *h == hash));
        assert_eq!(node.descendants(), 1);
    }

    #[test]
    fn test_decode_empty_branch() {
        let node = Node::decode(&[0x80, 0x00, 0x00]).unwrap();
        assert!(node.is_branch());
        assert_eq!(node.num_children(), 0);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Node::decode(&[0b0000_1000]).unwrap_err(),
            DecodeError::VariantUnknown { header: 0b0000_1000 }
        );
        assert_eq!(Node::decode(&[0x00]).unwrap_err(), DecodeError::EmptyNode);
        assert_eq!(
            Node::decode(&[0x80, 0x00]).unwrap_err().to_string(),
            "cannot read children bitmap: unexpected end of input at offset 1: need 1 more byte(s)"
        );
        assert_eq!(
            Node::decode(&[0x42, 0x12, 4, 1, 99]).unwrap_err(),
            DecodeError::TrailingBytes { trailing: 1 }
        );
    }

    #[test]
    fn test_decode_child_hash_error_has_index() {
        let err = Node::decode(&[0x80, 0x00, 0x04, 128, 1, 2]).unwrap_err();
        assert!(matches!(err, DecodeError::DecodeChildHash { index: 10, .. }));
        assert!(err.to_string().starts_with("cannot decode child hash: at index 10: "));
    }

    #[test]
    fn test_decode_inlined_child_error() {
        // child blob [0x08] has an unknown variant
        let err = Node::decode(&[0x80, 0x01, 0x00, 4, 0x08]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "decoding inlined child at index 0: node variant is unknown: for header byte 00001000"
        );
    }

    /// The value a node decodes back to: long inline values come back by hash
    fn decoded_value(value: Option<&StorageValue>, version: StateVersion) -> Option<StorageValue> {
        match value {
            Some(StorageValue::Inline(bytes)) if version.hashes_value(bytes.len()) => {
                Some(StorageValue::Hashed {
                    hash: Hash::digest(bytes),
                    value: None,
                })
            }
            Some(StorageValue::Hashed { hash, .. }) => Some(StorageValue::Hashed {
                hash: *hash,
                value: None,
            }),
            other => other.cloned(),
        }
    }

    proptest! {
        #[test]
        fn prop_decode_restores_encoded_fields(
            entries in prop::collection::btree_map(
                prop::collection::vec(any::<u8>(), 0..6),
                prop::collection::vec(any::<u8>(), 0..48),
                1..60,
            ),
            v0 in any::<bool>(),
        ) {
            let version = if v0 { StateVersion::V0 } else { StateVersion::V1 };
            let mut trie = Trie::new(version);
            for (key, value) in &entries {
                trie.put(key, value.clone()).unwrap();
            }
            let root = trie.root().unwrap();

            let mut encoded = Vec::new();
            root.encode(version, &mut encoded).unwrap();
            let decoded = Node::decode(&encoded).unwrap();

            prop_assert_eq!(decoded.is_leaf(), root.is_leaf());
            prop_assert_eq!(decoded.partial_key(), root.partial_key());
            prop_assert_eq!(decoded.value().cloned(), decoded_value(root.value(), version));
            prop_assert_eq!(decoded.children_bitmap(), root.children_bitmap());
            prop_assert!(!decoded.dirty);
        }
    }

    #[test]
    fn test_decode_reproduces_semantic_fields() {
        let original = Node::new_branch(vec![3, 4, 5], Some(vec![1, 2, 3]))
            .with_child(0, Node::new_leaf(vec![1], vec![1]))
            .with_child(7, Node::new_leaf(vec![2; 20], vec![9; 50]))
            .with_child(15, Node::new_branch(vec![], None).with_child(1, Node::new_leaf(vec![], vec![])));
        let encoded = encode(&original);
        let decoded = Node::decode(&encoded).unwrap();

        assert_eq!(decoded.partial_key, original.partial_key);
        assert_eq!(decoded.value, original.value);
        assert_eq!(decoded.children_bitmap(), original.children_bitmap());
        assert_eq!(decoded.encoding(StateVersion::V1).unwrap(), &encoded[..]);
        assert_eq!(encode(&decoded), encoded);
    }
}
