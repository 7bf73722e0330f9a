//! Stored record framing for the file store

use serde::{Deserialize, Serialize};

/// How a blob's bytes are laid out on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobEncoding {
    /// Stored as-is
    Raw,
    /// zstd-compressed
    Zstd,
}

impl BlobEncoding {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobEncoding::Raw => 0,
            BlobEncoding::Zstd => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobEncoding::Raw),
            1 => Some(BlobEncoding::Zstd),
            _ => None,
        }
    }
}

/// A node encoding or storage value as written to disk
#[derive(Clone, Debug)]
pub struct Blob {
    pub encoding: BlobEncoding,
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

/// Blobs shorter than this are never worth compressing
const MIN_COMPRESS_LEN: usize = 64;

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Blob {
            encoding: BlobEncoding::Raw,
            data,
        }
    }

    /// Serialize for storage, compressing only when it actually saves space
    pub fn pack(&self, compress: bool) -> crate::Result<Vec<u8>> {
        if compress && self.data.len() >= MIN_COMPRESS_LEN {
            let compressed = zstd::encode_all(self.data.as_slice(), 3)?;
            if compressed.len() < self.data.len() {
                let mut output = Vec::with_capacity(compressed.len() + 1);
                output.push(BlobEncoding::Zstd.as_byte());
                output.extend(compressed);
                return Ok(output);
            }
        }

        let mut output = Vec::with_capacity(self.data.len() + 1);
        output.push(BlobEncoding::Raw.as_byte());
        output.extend_from_slice(&self.data);
        Ok(output)
    }

    /// Restore a blob written by [`Blob::pack`]
    pub fn unpack(data: &[u8]) -> crate::Result<Self> {
        let (&flag, body) = data
            .split_first()
            .ok_or_else(|| crate::Error::Corruption("Empty blob data".into()))?;

        let encoding = BlobEncoding::from_byte(flag)
            .ok_or_else(|| crate::Error::Corruption(format!("Invalid blob encoding: {}", flag)))?;

        let data = match encoding {
            BlobEncoding::Raw => body.to_vec(),
            BlobEncoding::Zstd => zstd::decode_all(body)?,
        };

        Ok(Blob { encoding, data })
    }

    /// Get the size of the uncompressed data
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip_compressed() {
        let original = Blob::new(vec![7u8; 4096]);
        let packed = original.pack(true).unwrap();
        assert_eq!(packed[0], BlobEncoding::Zstd.as_byte());
        assert!(packed.len() < original.size());

        let restored = Blob::unpack(&packed).unwrap();
        assert_eq!(restored.encoding, BlobEncoding::Zstd);
        assert_eq!(restored.data, original.data);
    }

    #[test]
    fn test_small_blob_stays_raw() {
        let original = Blob::new(vec![65, 1, 4, 2]);
        let packed = original.pack(true).unwrap();
        assert_eq!(packed, vec![0, 65, 1, 4, 2]);
        assert_eq!(Blob::unpack(&packed).unwrap().data, original.data);
    }

    #[test]
    fn test_unpack_rejects_bad_flag() {
        assert!(Blob::unpack(&[]).is_err());
        assert!(Blob::unpack(&[9, 1, 2]).is_err());
    }
}
