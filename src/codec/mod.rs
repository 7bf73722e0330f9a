//! Byte-level codecs shared by the node format
//!
//! - [`nibbles`]: byte keys to and from 4-bit nibble sequences
//! - [`compact`]: SCALE compact integers used for every length prefix
//! - [`header`]: the node header byte(s) carrying variant and key length

pub mod compact;
pub mod header;
pub mod nibbles;
mod reader;

pub use compact::{read_compact, read_length_prefixed, write_compact, write_length_prefixed};
pub use header::{decode_header, encode_header, Variant, MAX_PARTIAL_KEY_LENGTH};
pub use nibbles::{common_prefix_len, key_le_to_nibbles, nibbles_to_hex, nibbles_to_key_le};
pub use reader::ByteReader;
