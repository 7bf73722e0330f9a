//! Merkle proofs of inclusion
//!
//! A proof is an unordered list of node encodings: every node stored under
//! its own hash that the walk to each proven key passes through, plus the
//! payload of any hashed storage value found at the end of a walk. Inlined
//! children need no entry because they are part of their parent's bytes.

mod generate;
mod verify;

pub use generate::generate;
pub use verify::verify;

/// Render bytes for error messages: `nil` when absent, full hex up to 20
/// bytes, first and last 8 bytes otherwise.
pub fn bytes_to_string(bytes: Option<&[u8]>) -> String {
    match bytes {
        None => "nil".to_string(),
        Some(b) if b.len() <= 20 => format!("0x{}", hex::encode(b)),
        Some(b) => format!(
            "0x{}...{}",
            hex::encode(&b[..8]),
            hex::encode(&b[b.len() - 8..])
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProofError;
    use crate::model::Hash;
    use crate::node::StateVersion;
    use crate::store::SharedMemoryDb;
    use crate::trie::Trie;
    use crate::Error;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_bytes_to_string() {
        assert_eq!(bytes_to_string(None), "nil");
        assert_eq!(bytes_to_string(Some(&[])), "0x");
        assert_eq!(bytes_to_string(Some(&[1, 2])), "0x0102");
        let long: Vec<u8> = (0..30).collect();
        assert_eq!(
            bytes_to_string(Some(&long)),
            "0x0001020304050607...161718191a1b1c1d"
        );
    }

    fn build(entries: &[(&[u8], Vec<u8>)]) -> (Trie, SharedMemoryDb, Hash) {
        let db = SharedMemoryDb::new();
        let mut trie = Trie::new(StateVersion::V1);
        for (key, value) in entries {
            trie.put(key, value.clone()).unwrap();
        }
        trie.write_dirty(&db).unwrap();
        let root = trie.hash().unwrap();
        (trie, db, root)
    }

    #[test]
    fn test_cat_scenario() {
        let v1 = b"v1".to_vec();
        let v2 = b"v2".to_vec();
        let v3 = b"v3".to_vec();
        let (_, db, root) = build(&[
            (b"cat", v1.clone()),
            (b"catapulta", v2),
            (b"catapora", v3.clone()),
        ]);

        let proof = generate(root, &[b"catapora"], &db).unwrap();
        verify(&proof, root, b"catapora", &v3).unwrap();

        let err = verify(&proof, root, b"catapora", &v1).unwrap_err();
        assert!(matches!(
            err,
            Error::Proof(ProofError::ValueMismatchProofTrie { .. })
        ));
        assert_eq!(
            err.to_string(),
            "expected value 0x7631 but got value 0x7633 from proof trie"
        );
    }

    #[test]
    fn test_large_trie_proofs() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u32..200)
            .map(|i| (format!("key-{i}").into_bytes(), vec![i as u8; (i % 70) as usize + 1]))
            .collect();
        let borrowed: Vec<(&[u8], Vec<u8>)> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.clone()))
            .collect();
        let (_, db, root) = build(&borrowed);

        let keys = [b"key-7".to_vec(), b"key-150".to_vec(), b"key-69".to_vec()];
        let proof = generate(root, &keys, &db).unwrap();

        for key in &keys {
            let value = &entries.iter().find(|(k, _)| k == key).unwrap().1;
            verify(&proof, root, key, value).unwrap();
            verify(&proof, root, key, &[]).unwrap();
        }
    }

    #[test]
    fn test_key_absent_from_proof_trie() {
        let (_, db, root) = build(&[(b"alpha", vec![1; 40]), (b"beta", vec![2; 40])]);
        let proof = generate(root, &[b"alpha"], &db).unwrap();

        let err = verify(&proof, root, b"gamma", &[]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_generate_missing_key() {
        let (_, db, root) = build(&[(b"alpha", vec![1; 40]), (b"beta", vec![2; 40])]);
        let err = generate(root, &[b"gamma"], &db).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            format!("walking to node at key 0x{}: key not found", hex::encode(b"gamma"))
        );
    }

    #[test]
    fn test_generate_missing_root() {
        let db = SharedMemoryDb::new();
        let root = Hash::digest(b"nope");
        let err = generate(root, &[b"k"], &db).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("loading trie: failed to find root key {}", root)
        );
    }

    proptest! {
        #[test]
        fn prop_generate_then_verify(
            entries in prop::collection::btree_map(
                prop::collection::vec(any::<u8>(), 1..6),
                prop::collection::vec(any::<u8>(), 1..50),
                1..30,
            ),
            pick in any::<prop::sample::Index>(),
        ) {
            let entries: BTreeMap<Vec<u8>, Vec<u8>> = entries;
            let borrowed: Vec<(&[u8], Vec<u8>)> =
                entries.iter().map(|(k, v)| (k.as_slice(), v.clone())).collect();
            let (_, db, root) = build(&borrowed);

            let (key, value) = entries.iter().nth(pick.index(entries.len())).unwrap();
            let proof = generate(root, &[key], &db).unwrap();
            prop_assert!(verify(&proof, root, key, value).is_ok());
        }
    }
}
