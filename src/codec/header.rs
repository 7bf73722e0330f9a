//! Node header codec
//!
//! The first byte of every node encoding selects its variant in the high
//! bits and holds the partial-key length in the remaining low bits:
//!
//! ```text
//! 01xx_xxxx  leaf
//! 10xx_xxxx  branch
//! 11xx_xxxx  branch with value
//! 001x_xxxx  leaf with hashed value
//! 0001_xxxx  branch with hashed value
//! 0000_0000  empty
//! ```
//!
//! When the length does not fit, the low bits are all set and the rest of
//! the length follows as a run of `255` bytes ended by one byte below `255`.

use super::ByteReader;
use crate::error::DecodeError;
use crate::{Error, Result};
use std::io::Write;

/// Longest partial key (in nibbles) the header can describe
pub const MAX_PARTIAL_KEY_LENGTH: usize = u16::MAX as usize;

/// Node variant carried in the header byte
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Leaf,
    Branch,
    BranchWithValue,
    LeafWithHashedValue,
    BranchWithHashedValue,
    Empty,
}

/// Variants ordered from the widest mask to the narrowest, the order in
/// which a header byte has to be matched.
const VARIANTS_BY_MASK: [Variant; 6] = [
    Variant::Empty,
    Variant::BranchWithHashedValue,
    Variant::LeafWithHashedValue,
    Variant::Leaf,
    Variant::Branch,
    Variant::BranchWithValue,
];

impl Variant {
    /// Bits identifying the variant
    pub const fn bits(self) -> u8 {
        match self {
            Variant::Leaf => 0b0100_0000,
            Variant::Branch => 0b1000_0000,
            Variant::BranchWithValue => 0b1100_0000,
            Variant::LeafWithHashedValue => 0b0010_0000,
            Variant::BranchWithHashedValue => 0b0001_0000,
            Variant::Empty => 0b0000_0000,
        }
    }

    /// Mask selecting the variant bits of a header byte
    pub const fn mask(self) -> u8 {
        match self {
            Variant::Leaf | Variant::Branch | Variant::BranchWithValue => 0b1100_0000,
            Variant::LeafWithHashedValue => 0b1110_0000,
            Variant::BranchWithHashedValue => 0b1111_0000,
            Variant::Empty => 0b1111_1111,
        }
    }

    /// Mask selecting the partial-key length bits of a header byte
    pub const fn key_length_mask(self) -> u8 {
        !self.mask()
    }

    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Variant::Branch | Variant::BranchWithValue | Variant::BranchWithHashedValue
        )
    }

    /// True when a storage value follows the key (or bitmap)
    pub const fn has_value(self) -> bool {
        !matches!(self, Variant::Branch | Variant::Empty)
    }

    pub const fn has_hashed_value(self) -> bool {
        matches!(
            self,
            Variant::LeafWithHashedValue | Variant::BranchWithHashedValue
        )
    }

    /// Identify the variant of a header byte
    pub fn from_header_byte(header: u8) -> std::result::Result<Self, DecodeError> {
        VARIANTS_BY_MASK
            .into_iter()
            .find(|variant| header & variant.mask() == variant.bits())
            .ok_or(DecodeError::VariantUnknown { header })
    }
}

/// Write the header for a node of `variant` with a partial key of
/// `key_length` nibbles.
pub fn encode_header<W: Write>(w: &mut W, variant: Variant, key_length: usize) -> Result<()> {
    if key_length > MAX_PARTIAL_KEY_LENGTH {
        return Err(Error::PartialKeyTooBig(key_length));
    }

    if variant == Variant::Empty {
        w.write_all(&[Variant::Empty.bits()])?;
        return Ok(());
    }

    let mask = variant.key_length_mask();
    if key_length < usize::from(mask) {
        w.write_all(&[variant.bits() | key_length as u8])?;
        return Ok(());
    }

    w.write_all(&[variant.bits() | mask])?;
    let mut remaining = key_length - usize::from(mask);
    loop {
        if remaining < 255 {
            w.write_all(&[remaining as u8])?;
            break;
        }
        w.write_all(&[255])?;
        remaining -= 255;
    }
    Ok(())
}

/// Read a header, returning the variant and the partial-key length
pub fn decode_header(r: &mut ByteReader<'_>) -> std::result::Result<(Variant, usize), DecodeError> {
    let header = r.read_byte()?;
    let variant = Variant::from_header_byte(header)?;

    let mask = variant.key_length_mask();
    let mut key_length = usize::from(header & mask);
    if mask == 0 || key_length < usize::from(mask) {
        return Ok((variant, key_length));
    }

    loop {
        let next = r.read_byte()?;
        key_length += usize::from(next);
        if key_length > MAX_PARTIAL_KEY_LENGTH {
            return Err(DecodeError::PartialKeyTooBig {
                overflow: key_length - MAX_PARTIAL_KEY_LENGTH,
            });
        }
        if next < 255 {
            return Ok((variant, key_length));
        }
    }
}
