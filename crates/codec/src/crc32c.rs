//! CRC32C (Castagnoli) with the masked form used for on-disk checksums.
//!
//! A CRC stored inside data that is itself later CRC'd (a WAL record
//! embedded in a MANIFEST, say) would weaken both checksums, so stored
//! CRCs are *masked*: rotated and offset by a constant. [`mask`] and
//! [`unmask`] are exact inverses.

use crc::{Crc, CRC_32_ISCSI};

static CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282_ead8;

/// Returns the CRC32C of `data`.
pub fn value(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

/// Masks `crc` for storage alongside the data it covers.
pub fn mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask`].
pub fn unmask(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

/// Streaming CRC32C over multiple byte slices.
///
/// ```
/// let mut h = codec::crc32c::Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize(), codec::crc32c::value(b"hello world"));
/// ```
pub struct Hasher {
    digest: crc::Digest<'static, u32>,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CASTAGNOLI.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
