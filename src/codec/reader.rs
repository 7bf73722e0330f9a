//! Bounds-checked cursor over an encoded node

use crate::error::DecodeError;

/// Reads bytes from a slice while tracking the offset for error context
#[derive(Debug)]
pub struct ByteReader<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        ByteReader { input, offset: 0 }
    }

    /// Current position in the input
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.input.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The bytes consumed so far, starting at `start`
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.input[start..self.offset]
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                offset: self.offset,
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.input[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }
}
