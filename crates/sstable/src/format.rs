use codec::{get_varint64, put_fixed64, put_varint64};
use types::{Error, Result};

/// `0xdb4775248b80fb57`, written little-endian as the last 8 bytes of
/// every table file.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Compression tag byte plus masked CRC32C.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Two varint64s.
pub const MAX_ENCODED_HANDLE: usize = 20;

/// Two padded handles plus the magic.
pub const FOOTER_SIZE: usize = 2 * MAX_ENCODED_HANDLE + 8;

/// Location of a block inside a table file: byte offset and size of the
/// block contents, excluding the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(MAX_ENCODED_HANDLE);
        self.encode_to(&mut dst);
        dst
    }

    pub fn decode_from(input: &mut &[u8]) -> Result<BlockHandle> {
        let offset =
            get_varint64(input).map_err(|_| Error::Corruption("bad block handle".into()))?;
        let size =
            get_varint64(input).map_err(|_| Error::Corruption("bad block handle".into()))?;
        Ok(BlockHandle { offset, size })
    }
}

/// The fixed-size table footer: handles for the metaindex and index
/// blocks, padded to their maximum encoding, then the magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let start = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(start + 2 * MAX_ENCODED_HANDLE, 0);
        put_fixed64(dst, TABLE_MAGIC);
        debug_assert_eq!(dst.len(), start + FOOTER_SIZE);
    }

    pub fn decode_from(input: &[u8]) -> Result<Footer> {
        if input.len() < FOOTER_SIZE {
            return Err(Error::Corruption(
                "file is too short to be a table".into(),
            ));
        }
        let magic = codec::decode_fixed64(&input[FOOTER_SIZE - 8..FOOTER_SIZE]);
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption("not a table file (bad magic)".into()));
        }
        let mut cursor = &input[..FOOTER_SIZE - 8];
        let metaindex_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}
