//! Byte-in / byte-out page compression.

use crate::error::{Result, TsFileError};
use crate::schema::Compression;

/// Compresses a page payload with the given codec.
pub fn compress(kind: Compression, bytes: &[u8]) -> Vec<u8> {
    match kind {
        Compression::Uncompressed => bytes.to_vec(),
        Compression::Lz4 => lz4_flex::block::compress(bytes),
    }
}

/// Decompresses a page payload. `uncompressed_size` comes from the page
/// header.
pub fn decompress(kind: Compression, bytes: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    match kind {
        Compression::Uncompressed => {
            if bytes.len() != uncompressed_size {
                return Err(TsFileError::Corrupted(format!(
                    "uncompressed page size mismatch: header says {}, payload is {}",
                    uncompressed_size,
                    bytes.len()
                )));
            }
            Ok(bytes.to_vec())
        }
        Compression::Lz4 => {
            let out = lz4_flex::block::decompress(bytes, uncompressed_size)
                .map_err(|e| TsFileError::Corrupted(format!("LZ4 page payload: {}", e)))?;
            if out.len() != uncompressed_size {
                return Err(TsFileError::Corrupted(format!(
                    "LZ4 page size mismatch: header says {}, decompressed to {}",
                    uncompressed_size,
                    out.len()
                )));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncompressed_roundtrip() {
        let data = b"time goes by".to_vec();
        let packed = compress(Compression::Uncompressed, &data);
        assert_eq!(packed, data);
        assert_eq!(
            decompress(Compression::Uncompressed, &packed, data.len()).unwrap(),
            data
        );
    }

    #[test]
    fn test_lz4_roundtrip() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 7) as u8).collect();
        let packed = compress(Compression::Lz4, &data);
        assert!(packed.len() < data.len());
        assert_eq!(decompress(Compression::Lz4, &packed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_size_mismatch_is_corrupted() {
        let data = b"abcdef".to_vec();
        let packed = compress(Compression::Lz4, &data);
        assert!(decompress(Compression::Lz4, &packed, data.len() + 1).is_err());
        assert!(decompress(Compression::Uncompressed, &data, 3).is_err());
    }
}
