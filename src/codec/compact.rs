//! SCALE compact integers
//!
//! Every length prefix in the node format (storage values, child Merkle
//! values) is a compact integer. The two low bits of the first byte select
//! the mode:
//!
//! ```text
//! 0b00  single byte        value < 2^6
//! 0b01  two bytes LE       value < 2^14
//! 0b10  four bytes LE      value < 2^30
//! 0b11  big integer        (first >> 2) + 4 little-endian bytes follow
//! ```

use super::ByteReader;
use crate::error::DecodeError;
use std::io::{self, Write};

const SINGLE_BYTE_MAX: u64 = (1 << 6) - 1;
const TWO_BYTE_MAX: u64 = (1 << 14) - 1;
const FOUR_BYTE_MAX: u64 = (1 << 30) - 1;

/// Write `value` as a compact integer
pub fn write_compact<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    if value <= SINGLE_BYTE_MAX {
        w.write_all(&[(value as u8) << 2])
    } else if value <= TWO_BYTE_MAX {
        w.write_all(&(((value as u16) << 2) | 0b01).to_le_bytes())
    } else if value <= FOUR_BYTE_MAX {
        w.write_all(&(((value as u32) << 2) | 0b10).to_le_bytes())
    } else {
        let bytes = value.to_le_bytes();
        let len = 8 - (value.leading_zeros() / 8) as usize;
        w.write_all(&[0b11 | (((len - 4) as u8) << 2)])?;
        w.write_all(&bytes[..len])
    }
}

/// Write a compact length followed by the bytes themselves
pub fn write_length_prefixed<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_compact(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

/// Read a compact integer
pub fn read_compact(r: &mut ByteReader<'_>) -> Result<u64, DecodeError> {
    let first = r.read_byte()?;
    match first & 0b11 {
        0b00 => Ok(u64::from(first >> 2)),
        0b01 => {
            let second = r.read_byte()?;
            Ok(u64::from(u16::from_le_bytes([first, second]) >> 2))
        }
        0b10 => {
            let rest = r.read_array::<3>()?;
            Ok(u64::from(
                u32::from_le_bytes([first, rest[0], rest[1], rest[2]]) >> 2,
            ))
        }
        _ => {
            let len = usize::from(first >> 2) + 4;
            if len > 8 {
                return Err(DecodeError::CompactPrefix { prefix: first });
            }
            let mut bytes = [0u8; 8];
            bytes[..len].copy_from_slice(r.read_bytes(len)?);
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Read a compact length and then that many bytes
pub fn read_length_prefixed<'a>(r: &mut ByteReader<'a>) -> Result<&'a [u8], DecodeError> {
    let len = read_compact(r)?;
    let remaining = r.remaining();
    match usize::try_from(len) {
        Ok(len) if len <= remaining => r.read_bytes(len),
        _ => Err(DecodeError::UnexpectedEof {
            offset: r.offset(),
            needed: usize::try_from(len).unwrap_or(usize::MAX) - remaining,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_compact(&mut out, value).unwrap();
        out
    }

    #[test]
    fn test_compact_modes() {
        assert_eq!(encode(0), vec![0]);
        assert_eq!(encode(1), vec![4]);
        assert_eq!(encode(63), vec![252]);
        assert_eq!(encode(64), vec![1, 1]);
        assert_eq!(encode(16383), vec![0xFD, 0xFF]);
        assert_eq!(encode(16384), vec![2, 0, 1, 0]);
        assert_eq!(encode(1 << 30), vec![3, 0, 0, 0, 0x40]);
        assert_eq!(encode(u64::MAX), vec![0b0001_0011, 255, 255, 255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_compact_decode_each_mode() {
        for value in [0, 1, 63, 64, 16383, 16384, (1 << 30) - 1, 1 << 30, u64::MAX] {
            let encoded = encode(value);
            let mut reader = ByteReader::new(&encoded);
            assert_eq!(read_compact(&mut reader).unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_compact_unknown_prefix() {
        let mut reader = ByteReader::new(&[255]);
        let err = read_compact(&mut reader).unwrap_err();
        assert_eq!(err.to_string(), "unknown prefix for compact uint: 255");
    }

    #[test]
    fn test_length_prefixed() {
        let mut out = Vec::new();
        write_length_prefixed(&mut out, &[7, 8, 9]).unwrap();
        assert_eq!(out, vec![12, 7, 8, 9]);

        let mut reader = ByteReader::new(&out);
        assert_eq!(read_length_prefixed(&mut reader).unwrap(), &[7, 8, 9]);
    }

    #[test]
    fn test_length_prefixed_truncated() {
        let mut reader = ByteReader::new(&[12, 7]);
        assert_eq!(
            read_length_prefixed(&mut reader),
            Err(DecodeError::UnexpectedEof {
                offset: 1,
                needed: 2
            })
        );
    }
}
