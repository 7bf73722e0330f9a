//! Node encoding
//!
//! `header | packed partial key | [bitmap] | [value] | [children]`

use super::parallel::{self, TokenPool};
use super::{merkle, Child, Node, NodeKind, StateVersion, StorageValue, CHILDREN_CAPACITY};
use crate::codec::{encode_header, nibbles_to_key_le, write_length_prefixed, Variant};
use crate::{Error, Result};
use std::io::Write;

impl Node {
    /// Header variant this node is written with under `version`
    pub fn variant(&self, version: StateVersion) -> Variant {
        let hashed = self
            .value
            .as_ref()
            .map(|value| value.encoded_hash(version).is_some());
        match (&self.kind, hashed) {
            (NodeKind::Leaf, Some(true)) => Variant::LeafWithHashedValue,
            (NodeKind::Leaf, _) => Variant::Leaf,
            (NodeKind::Branch(_), None) => Variant::Branch,
            (NodeKind::Branch(_), Some(false)) => Variant::BranchWithValue,
            (NodeKind::Branch(_), Some(true)) => Variant::BranchWithHashedValue,
        }
    }

    /// Write the encoding of this node
    ///
    /// Branch children that are themselves branches may be encoded on worker
    /// threads; the output is identical to [`Node::encode_sequential`].
    pub fn encode<W: Write>(&self, version: StateVersion, w: &mut W) -> Result<()> {
        self.encode_with(Some(parallel::encode_pool()), version, w)
    }

    /// Write the encoding of this node without any worker threads and
    /// without consulting or filling memoized child Merkle values.
    pub fn encode_sequential<W: Write>(&self, version: StateVersion, w: &mut W) -> Result<()> {
        self.encode_with(None, version, w)
    }

    pub(crate) fn encode_with<W: Write>(
        &self,
        pool: Option<&TokenPool>,
        version: StateVersion,
        w: &mut W,
    ) -> Result<()> {
        encode_header(w, self.variant(version), self.partial_key.len())?;
        w.write_all(&nibbles_to_key_le(&self.partial_key))?;

        match &self.kind {
            NodeKind::Leaf => write_value(self.value.as_ref(), version, w),
            NodeKind::Branch(branch) => {
                w.write_all(&branch.children_bitmap().to_le_bytes())?;
                write_value(self.value.as_ref(), version, w)?;
                match pool {
                    Some(pool) => parallel::encode_children(pool, &branch.children, version, w),
                    None => encode_children_sequential(&branch.children, version, w),
                }
            }
        }
    }
}

fn write_value<W: Write>(
    value: Option<&StorageValue>,
    version: StateVersion,
    w: &mut W,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    match (value.encoded_hash(version), value) {
        (Some(hash), _) => w.write_all(hash.as_bytes())?,
        (None, StorageValue::Inline(bytes)) => write_length_prefixed(w, bytes)?,
        (None, StorageValue::Hashed { hash, .. }) => w.write_all(hash.as_bytes())?,
    }
    Ok(())
}

fn encode_children_sequential<W: Write>(
    children: &[Option<Child>; CHILDREN_CAPACITY],
    version: StateVersion,
    w: &mut W,
) -> Result<()> {
    for (index, child) in children.iter().enumerate() {
        let Some(child) = child else {
            continue;
        };
        let written = match child {
            Child::Hash(hash) => write_length_prefixed(w, hash.as_bytes()).map_err(Error::from),
            Child::Node(node) => {
                let mut encoding = Vec::new();
                node.encode_sequential(version, &mut encoding).and_then(|()| {
                    write_length_prefixed(w, &merkle::merkle_value(&encoding)).map_err(Error::from)
                })
            }
        };
        written.map_err(|err| Error::ChildEncoding {
            index,
            source: Box::new(err),
        })?;
    }
    Ok(())
}
