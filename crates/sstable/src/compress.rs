//! Byte-in / byte-out block codec.
//!
//! Compression is an interchangeable transform applied to block contents
//! just before the trailer is written; the trailer's tag byte records
//! which codec produced the bytes. Zstd output that fails to shrink the
//! block is discarded and the raw bytes are stored instead.

use std::borrow::Cow;

use types::{CompressionType, Error, Result};

/// Compresses `raw` per the requested codec, returning the bytes to
/// store and the tag actually used (compression quietly degrades to
/// `None` when it does not pay for itself).
pub fn compress_block(requested: CompressionType, raw: &[u8]) -> (Cow<'_, [u8]>, CompressionType) {
    match requested {
        CompressionType::None => (Cow::Borrowed(raw), CompressionType::None),
        CompressionType::Zstd => match zstd::bulk::compress(raw, 0) {
            Ok(compressed) if compressed.len() < raw.len() => {
                (Cow::Owned(compressed), CompressionType::Zstd)
            }
            _ => (Cow::Borrowed(raw), CompressionType::None),
        },
    }
}

/// Inverts [`compress_block`] given the stored tag byte.
pub fn decompress_block(tag: u8, stored: Vec<u8>) -> Result<Vec<u8>> {
    match CompressionType::from_u8(tag) {
        Some(CompressionType::None) => Ok(stored),
        Some(CompressionType::Zstd) => zstd::stream::decode_all(stored.as_slice())
            .map_err(|_| Error::Corruption("bad zstd-compressed block".into())),
        None => Err(Error::Corruption("unknown block compression tag".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let data = b"hello world".to_vec();
        let (stored, tag) = compress_block(CompressionType::None, &data);
        assert_eq!(tag, CompressionType::None);
        assert_eq!(
            decompress_block(tag as u8, stored.into_owned()).unwrap(),
            data
        );
    }

    #[test]
    fn zstd_round_trips_compressible_data() {
        let data = vec![b'a'; 8192];
        let (stored, tag) = compress_block(CompressionType::Zstd, &data);
        assert_eq!(tag, CompressionType::Zstd);
        assert!(stored.len() < data.len());
        assert_eq!(
            decompress_block(tag as u8, stored.into_owned()).unwrap(),
            data
        );
    }

    #[test]
    fn incompressible_data_falls_back_to_none() {
        // A short high-entropy buffer that zstd cannot shrink.
        let data: Vec<u8> = (0..64u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let (stored, tag) = compress_block(CompressionType::Zstd, &data);
        assert_eq!(tag, CompressionType::None);
        assert_eq!(stored.as_ref(), data.as_slice());
    }

    #[test]
    fn unknown_tag_is_corruption() {
        assert!(decompress_block(0x7e, b"whatever".to_vec()).is_err());
    }

    #[test]
    fn corrupt_zstd_payload_is_corruption() {
        assert!(decompress_block(CompressionType::Zstd as u8, b"not zstd".to_vec()).is_err());
    }
}
