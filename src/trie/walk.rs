//! Read-only traversal

use super::Trie;
use crate::codec::{key_le_to_nibbles, nibbles_to_key_le};
use crate::node::{Child, Node};
use std::cmp::Ordering;
use std::collections::BTreeMap;

impl Trie {
    /// Value stored under `key`
    ///
    /// Lookups are total: an absent key, a walk that reaches an unresolved
    /// child and a hashed value whose bytes are unknown all give `None`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let nibbles = key_le_to_nibbles(key);
        let mut key = nibbles.as_slice();
        let mut node = self.root.as_deref()?;

        loop {
            if node.partial_key == key {
                return node.storage_value().map(<[u8]>::to_vec);
            }
            if node.is_leaf()
                || key.len() <= node.partial_key.len()
                || !key.starts_with(&node.partial_key)
            {
                return None;
            }

            let index = usize::from(key[node.partial_key.len()]);
            key = &key[node.partial_key.len() + 1..];
            node = match node.child(index)? {
                Child::Node(child) => child,
                Child::Hash(_) => return None,
            };
        }
    }

    /// Every key/value pair with a known value
    pub fn entries(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut entries = BTreeMap::new();
        if let Some(root) = self.root.as_deref() {
            visit(root, &mut Vec::new(), &mut |path, node| {
                if let Some(value) = node.storage_value() {
                    entries.insert(nibbles_to_key_le(path), value.to_vec());
                }
            });
        }
        entries
    }

    /// Keys starting with `prefix`, in lexicographic order
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let prefix = key_le_to_nibbles(prefix);
        let mut keys = Vec::new();
        if let Some(root) = self.root.as_deref() {
            collect_prefix(root, &mut Vec::new(), &prefix, &mut keys);
        }
        keys
    }

    /// Smallest key strictly greater than `key`
    pub fn next_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        let target = key_le_to_nibbles(key);
        let root = self.root.as_deref()?;
        next_after(root, &mut Vec::new(), &target).map(|path| nibbles_to_key_le(&path))
    }
}

/// Visit `node` and everything below it in key order, handing each node the
/// full nibble path up to and including its partial key.
fn visit(node: &Node, path: &mut Vec<u8>, f: &mut impl FnMut(&[u8], &Node)) {
    let depth = path.len();
    path.extend_from_slice(&node.partial_key);
    f(path, node);

    if let Some(branch) = node.branch() {
        for (index, child) in branch.children.iter().enumerate() {
            if let Some(Child::Node(child)) = child {
                path.push(index as u8);
                visit(child, path, f);
                path.pop();
            }
        }
    }
    path.truncate(depth);
}

fn collect_prefix(node: &Node, path: &mut Vec<u8>, prefix: &[u8], keys: &mut Vec<Vec<u8>>) {
    let depth = path.len();
    path.extend_from_slice(&node.partial_key);

    if path.starts_with(prefix) {
        let mut base = path[..depth].to_vec();
        visit(node, &mut base, &mut |key, node| {
            if node.value.is_some() {
                keys.push(nibbles_to_key_le(key));
            }
        });
    } else if prefix.starts_with(path) {
        if let Some(Child::Node(child)) = node.child(usize::from(prefix[path.len()])) {
            path.push(prefix[path.len()]);
            collect_prefix(child, path, prefix, keys);
            path.pop();
        }
    }
    path.truncate(depth);
}

/// Smallest key with a value in the subtree of `node`
fn first_key(node: &Node, path: &mut Vec<u8>) -> Option<Vec<u8>> {
    let depth = path.len();
    path.extend_from_slice(&node.partial_key);

    let found = if node.value.is_some() {
        Some(path.clone())
    } else {
        node.branch().and_then(|branch| {
            branch.children.iter().enumerate().find_map(|(index, child)| match child {
                Some(Child::Node(child)) => {
                    path.push(index as u8);
                    let found = first_key(child, path);
                    path.pop();
                    found
                }
                _ => None,
            })
        })
    };
    path.truncate(depth);
    found
}

/// Smallest key in the subtree of `node` strictly greater than `target`
fn next_after(node: &Node, path: &mut Vec<u8>, target: &[u8]) -> Option<Vec<u8>> {
    let depth = path.len();
    path.extend_from_slice(&node.partial_key);

    let shared = path.len().min(target.len());
    let found = match path[..shared].cmp(&target[..shared]) {
        Ordering::Less => None,
        Ordering::Greater => {
            path.truncate(depth);
            return first_key(node, path);
        }
        // The node's own key is a prefix of the target, so it sorts before.
        Ordering::Equal if path.len() <= target.len() => node.branch().and_then(|branch| {
            let start = target.get(path.len()).map_or(0, |n| usize::from(*n));
            (start..branch.children.len()).find_map(|index| match &branch.children[index] {
                Some(Child::Node(child)) => {
                    path.push(index as u8);
                    let found = if index == start && path.len() <= target.len() {
                        next_after(child, path, target)
                    } else {
                        first_key(child, path)
                    };
                    path.pop();
                    found
                }
                _ => None,
            })
        }),
        Ordering::Equal => {
            path.truncate(depth);
            return first_key(node, path);
        }
    };
    path.truncate(depth);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie_with(keys: &[&[u8]]) -> Trie {
        let mut trie = Trie::default();
        for key in keys {
            trie.put(key, key.to_vec()).unwrap();
        }
        trie
    }

    #[test]
    fn test_get_on_empty_trie() {
        assert_eq!(Trie::default().get(b"anything"), None);
    }

    #[test]
    fn test_get_does_not_match_inner_paths() {
        let trie = trie_with(&[b"abc", b"abd"]);
        assert_eq!(trie.get(b""), None);
        assert_eq!(trie.get(b"ab"), None);
    }

    #[test]
    fn test_entries() {
        let trie = trie_with(&[b"b", b"a", b"ab", b""]);
        let entries = trie.entries();
        let keys: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(keys, vec![b"".to_vec(), b"a".to_vec(), b"ab".to_vec(), b"b".to_vec()]);
        assert_eq!(entries[&b"ab".to_vec()], b"ab".to_vec());
    }

    #[test]
    fn test_trie_list_prefix() {
        let trie = trie_with(&[b"t:topic1", b"t:topic2", b"e:edge1", b"t"]);

        assert_eq!(
            trie.keys_with_prefix(b"t:"),
            vec![b"t:topic1".to_vec(), b"t:topic2".to_vec()]
        );
        assert_eq!(trie.keys_with_prefix(b"e:"), vec![b"e:edge1".to_vec()]);
        assert_eq!(trie.keys_with_prefix(b"t").len(), 3);
        assert_eq!(trie.keys_with_prefix(b"").len(), 4);
        assert!(trie.keys_with_prefix(b"x").is_empty());
    }

    #[test]
    fn test_keys_with_prefix_inside_partial_key() {
        let trie = trie_with(&[b"abcdef", b"abcxyz"]);
        assert_eq!(trie.keys_with_prefix(b"a").len(), 2);
        assert_eq!(trie.keys_with_prefix(b"abcd"), vec![b"abcdef".to_vec()]);
    }

    #[test]
    fn test_next_key() {
        let trie = trie_with(&[b"a", b"ab", b"abc", b"b", b"ba"]);

        assert_eq!(trie.next_key(b""), Some(b"a".to_vec()));
        assert_eq!(trie.next_key(b"a"), Some(b"ab".to_vec()));
        assert_eq!(trie.next_key(b"ab"), Some(b"abc".to_vec()));
        assert_eq!(trie.next_key(b"abc"), Some(b"b".to_vec()));
        assert_eq!(trie.next_key(b"aa"), Some(b"ab".to_vec()));
        assert_eq!(trie.next_key(b"abd"), Some(b"b".to_vec()));
        assert_eq!(trie.next_key(b"b"), Some(b"ba".to_vec()));
        assert_eq!(trie.next_key(b"ba"), None);
        assert_eq!(trie.next_key(b"c"), None);
    }

    #[test]
    fn test_next_key_matches_entries() {
        let keys: Vec<&[u8]> = vec![b"dog", b"doge", b"do", b"horse", b"hors", b"zebra"];
        let trie = trie_with(&keys);
        let sorted: Vec<Vec<u8>> = trie.entries().into_keys().collect();

        for pair in sorted.windows(2) {
            assert_eq!(trie.next_key(&pair[0]), Some(pair[1].clone()));
        }
        assert_eq!(trie.next_key(sorted.last().unwrap()), None);
    }
}
