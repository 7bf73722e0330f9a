//! Error types for nibble_trie

use crate::model::Hash;
use thiserror::Error;

/// Result type alias for nibble_trie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in nibble_trie operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoding node: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("partial key length cannot be larger than or equal to 2^16: {0}")]
    PartialKeyTooBig(usize),

    #[error("cannot write encoding of child at index {index}: {source}")]
    ChildEncoding {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid database key of {0} byte(s): node keys are 32-byte hashes")]
    InvalidKey(usize),

    #[error("node not found in database: {0}")]
    MissingNode(Hash),

    #[error("storage value not found in database: {0}")]
    MissingValue(Hash),

    #[error("unresolved child node at key {0}")]
    UnresolvedNode(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Root not found: {0}")]
    RootNotFound(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

/// Malformed node encodings
///
/// Every variant pins down where decoding stopped, either as a byte offset
/// into the input or as the child slot being decoded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("node variant is unknown: for header byte {header:08b}")]
    VariantUnknown { header: u8 },

    #[error("partial key length cannot be larger than 2^16: overflowed by {overflow}")]
    PartialKeyTooBig { overflow: usize },

    #[error("unexpected end of input at offset {offset}: need {needed} more byte(s)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("unknown prefix for compact uint: {prefix}")]
    CompactPrefix { prefix: u8 },

    #[error("cannot read partial key: {0}")]
    ReadPartialKey(Box<DecodeError>),

    #[error("cannot decode storage value: {0}")]
    DecodeValue(Box<DecodeError>),

    #[error("cannot read children bitmap: {0}")]
    ReadChildrenBitmap(Box<DecodeError>),

    #[error("cannot decode child hash: at index {index}: {source}")]
    DecodeChildHash {
        index: u8,
        #[source]
        source: Box<DecodeError>,
    },

    #[error("decoding inlined child at index {index}: {source}")]
    DecodeInlinedChild {
        index: u8,
        #[source]
        source: Box<DecodeError>,
    },

    #[error("child hash must be 32 bytes, got {length}")]
    InvalidHashLength { length: usize },

    #[error("empty node encoding does not describe a node")]
    EmptyNode,

    #[error("{trailing} trailing byte(s) after node encoding")]
    TrailingBytes { trailing: usize },
}

/// Proof generation and verification failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProofError {
    #[error("proof slice empty")]
    EmptyProof,

    #[error("root node not found in proof: for root hash {root} in proof hash digests {digests}")]
    RootNodeNotFound { root: String, digests: String },

    #[error("key not found in proof trie: {key} in proof trie for root hash {root}")]
    KeyNotFoundInProofTrie { key: String, root: String },

    #[error("expected value {expected} but got value {actual} from proof trie")]
    ValueMismatchProofTrie { expected: String, actual: String },

    #[error("walking to node at key {key}: key not found")]
    KeyNotFound { key: String },

    #[error("loading trie: failed to find root key {root}")]
    LoadingTrie { root: String },

    #[error("decoding node for hash digest {hash}: {source}")]
    DecodeNode {
        hash: String,
        #[source]
        source: DecodeError,
    },

    #[error("walking to node at key {key}: child node for hash digest {hash} not found")]
    MissingChild { hash: String, key: String },
}

impl Error {
    /// True for the not-found class of proof errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Proof(ProofError::KeyNotFound { .. })
                | Error::Proof(ProofError::KeyNotFoundInProofTrie { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_unknown_message() {
        let err = DecodeError::VariantUnknown { header: 0b0000_1000 };
        assert_eq!(
            err.to_string(),
            "node variant is unknown: for header byte 00001000"
        );
    }

    #[test]
    fn test_nested_decode_message() {
        let err = Error::from(DecodeError::DecodeChildHash {
            index: 3,
            source: Box::new(DecodeError::UnexpectedEof {
                offset: 10,
                needed: 32,
            }),
        });
        assert_eq!(
            err.to_string(),
            "decoding node: cannot decode child hash: at index 3: \
             unexpected end of input at offset 10: need 32 more byte(s)"
        );
    }
}
