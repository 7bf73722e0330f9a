//! Opportunistically parallel encoding of branch children
//!
//! Leaf children are cheap and always encoded in the calling thread. A branch
//! child is handed to a worker when a token can be taken from the pool
//! without blocking, and encoded in the caller otherwise, so the number of
//! encodings in flight never exceeds the pool capacity however deep the
//! trie is. Results are buffered and written strictly in slot order.

use super::{Child, StateVersion, CHILDREN_CAPACITY};
use crate::codec::write_length_prefixed;
use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, Sender};
use once_cell::sync::Lazy;
use std::io::Write;
use std::thread;
use tracing::trace;

static ENCODE_POOL: Lazy<TokenPool> = Lazy::new(|| {
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    TokenPool::new(cores)
});

/// The process-wide pool used by [`super::Node::encode`]
pub(super) fn encode_pool() -> &'static TokenPool {
    &ENCODE_POOL
}

/// A fixed number of tokens, taken without blocking
pub struct TokenPool {
    take: Receiver<()>,
    give: Sender<()>,
    capacity: usize,
}

impl TokenPool {
    pub fn new(capacity: usize) -> Self {
        let (give, take) = channel::bounded(capacity.max(1));
        for _ in 0..capacity {
            let _ = give.try_send(());
        }
        TokenPool {
            take,
            give,
            capacity,
        }
    }

    /// Take a token if one is free
    pub fn try_acquire(&self) -> Option<Token<'_>> {
        self.take.try_recv().ok().map(|()| Token { pool: self })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens not currently held
    pub fn available(&self) -> usize {
        self.take.len()
    }
}

/// A held token, returned to its pool on drop
pub struct Token<'a> {
    pool: &'a TokenPool,
}

impl Drop for Token<'_> {
    fn drop(&mut self) {
        let _ = self.pool.give.try_send(());
    }
}

/// Child Merkle values buffered until every lower slot has been written
struct OrderedWriter<'w, W: Write> {
    writer: &'w mut W,
    bitmap: u16,
    ready: [Option<Vec<u8>>; CHILDREN_CAPACITY],
    next: usize,
    error: Option<Error>,
}

impl<'w, W: Write> OrderedWriter<'w, W> {
    fn new(writer: &'w mut W, bitmap: u16) -> Self {
        OrderedWriter {
            writer,
            bitmap,
            ready: Default::default(),
            next: 0,
            error: None,
        }
    }

    fn accept(&mut self, index: usize, result: Result<Vec<u8>>) {
        match result {
            Ok(merkle_value) => {
                self.ready[index] = Some(merkle_value);
                self.flush();
            }
            Err(err) => self.fail(index, err),
        }
    }

    fn fail(&mut self, index: usize, err: Error) {
        if self.error.is_none() {
            self.error = Some(Error::ChildEncoding {
                index,
                source: Box::new(err),
            });
        }
    }

    fn flush(&mut self) {
        while self.error.is_none() && self.next < CHILDREN_CAPACITY {
            if self.bitmap & (1 << self.next) == 0 {
                self.next += 1;
                continue;
            }
            let Some(merkle_value) = self.ready[self.next].take() else {
                return;
            };
            if let Err(err) = write_length_prefixed(self.writer, &merkle_value) {
                self.fail(self.next, err.into());
                return;
            }
            self.next += 1;
        }
    }

    fn failed(&self) -> bool {
        self.error.is_some()
    }

    fn finish(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn child_merkle_value(child: &Child, version: StateVersion) -> Result<Vec<u8>> {
    match child {
        Child::Hash(hash) => Ok(hash.as_bytes().to_vec()),
        Child::Node(node) => node.merkle_value(version).map(<[u8]>::to_vec),
    }
}

/// Write the Merkle values of `children` in slot order, encoding branch
/// children on worker threads while `pool` has tokens to spare.
///
/// The first error is kept and returned only once every worker result has
/// been received.
pub(crate) fn encode_children<W: Write>(
    pool: &TokenPool,
    children: &[Option<Child>; CHILDREN_CAPACITY],
    version: StateVersion,
    w: &mut W,
) -> Result<()> {
    let bitmap = children
        .iter()
        .enumerate()
        .filter(|(_, child)| child.is_some())
        .fold(0u16, |bitmap, (i, _)| bitmap | (1 << i));
    let mut output = OrderedWriter::new(w, bitmap);

    thread::scope(|scope| {
        let (results_tx, results_rx) = channel::bounded(CHILDREN_CAPACITY);
        let mut in_flight = 0usize;

        for (index, child) in children.iter().enumerate() {
            if output.failed() {
                break;
            }
            let Some(child) = child else {
                continue;
            };

            let is_branch = matches!(child, Child::Node(node) if node.is_branch());
            if is_branch {
                if let Some(token) = pool.try_acquire() {
                    let results_tx: Sender<(usize, Result<Vec<u8>>)> = results_tx.clone();
                    trace!(index, "encoding branch child on worker");
                    in_flight += 1;
                    scope.spawn(move || {
                        let result = child_merkle_value(child, version);
                        drop(token);
                        let _ = results_tx.send((index, result));
                    });
                    continue;
                }
            }

            output.accept(index, child_merkle_value(child, version));
        }
        drop(results_tx);

        for (index, result) in results_rx.iter().take(in_flight) {
            output.accept(index, result);
        }
    });

    output.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Hash;
    use crate::node::Node;
    use crate::trie::Trie;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::io;

    fn wide_tree(depth: usize) -> Node {
        let mut node = Node::new_branch(vec![1, 2], Some(vec![depth as u8]));
        for index in 0..CHILDREN_CAPACITY {
            let child = if depth == 0 || index % 5 == 0 {
                Node::new_leaf(vec![index as u8; 3], vec![index as u8; 40])
            } else {
                wide_tree(depth - 1)
            };
            node = node.with_child(index, child);
        }
        node
    }

    fn encode_with_pool(node: &Node, pool: &TokenPool) -> Vec<u8> {
        let mut out = Vec::new();
        node.encode_with(Some(pool), StateVersion::V1, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_token_pool_try_acquire() {
        let pool = TokenPool::new(2);
        assert_eq!(pool.capacity(), 2);

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut sequential = Vec::new();
        wide_tree(2)
            .encode_sequential(StateVersion::V1, &mut sequential)
            .unwrap();

        for capacity in [0, 1, 4, 64] {
            let pool = TokenPool::new(capacity);
            assert_eq!(encode_with_pool(&wide_tree(2), &pool), sequential);
            assert_eq!(pool.available(), capacity);
        }
    }

    #[test]
    fn test_saturated_pool_falls_back_to_caller() {
        let pool = TokenPool::new(1);
        let _held = pool.try_acquire().unwrap();

        let tree = wide_tree(1);
        let mut expected = Vec::new();
        tree.encode_sequential(StateVersion::V1, &mut expected)
            .unwrap();
        assert_eq!(encode_with_pool(&tree, &pool), expected);
    }

    #[test]
    fn test_hash_children_written_in_order() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let node = Node::new_branch(vec![], None)
            .with_child(15, Child::Hash(b))
            .with_child(0, Child::Hash(a));

        let encoded = encode_with_pool(&node, &TokenPool::new(4));
        assert_eq!(&encoded[..3], &[0x80, 0x01, 0x80]);
        assert_eq!(encoded[3], 128);
        assert_eq!(&encoded[4..36], a.as_bytes());
        assert_eq!(encoded[36], 128);
        assert_eq!(&encoded[37..69], b.as_bytes());
    }

    fn trie_from(entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Trie {
        let mut trie = Trie::default();
        for (key, value) in entries {
            trie.put(key, value.clone()).unwrap();
        }
        trie
    }

    proptest! {
        #[test]
        fn prop_parallel_matches_sequential(
            entries in prop::collection::btree_map(
                prop::collection::vec(any::<u8>(), 0..6),
                prop::collection::vec(any::<u8>(), 0..48),
                1..200,
            ),
            capacity in 0usize..8,
        ) {
            let trie = trie_from(&entries);
            let root = trie.root().unwrap();

            let mut sequential = Vec::new();
            root.encode_sequential(StateVersion::V1, &mut sequential).unwrap();

            let pool = TokenPool::new(capacity);
            prop_assert_eq!(encode_with_pool(root, &pool), sequential.clone());
            prop_assert_eq!(pool.available(), capacity);

            let mut global = Vec::new();
            root.encode(StateVersion::V1, &mut global).unwrap();
            prop_assert_eq!(global, sequential);
        }
    }

    struct FailingWriter {
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "test error"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_error_reports_child_index() {
        let node = Node::new_branch(vec![], None)
            .with_child(11, Node::new_leaf(vec![1], vec![2]));
        // header and bitmap fit, the child does not
        let mut writer = FailingWriter { budget: 3 };
        let err = node
            .encode_with(Some(&TokenPool::new(2)), StateVersion::V1, &mut writer)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot write encoding of child at index 11: IO error: test error"
        );
    }
}
