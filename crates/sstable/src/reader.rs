//! Table reader: opens a file once, keeps the index and filter in
//! memory, and serves iterators and point lookups from it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use bloom::BloomFilterPolicy;
use parking_lot::Mutex;
use types::{
    extract_user_key, BytewiseComparator, Error, ErrorIterator, InternalIterator, Options,
    ReadOptions, Result,
};

use crate::block::{Block, BlockIter};
use crate::cache::{new_cache_id, Cache};
use crate::compress::decompress_block;
use crate::format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use crate::two_level::TwoLevelIterator;

/// Shared cache of uncompressed blocks, keyed by `(table cache id, block
/// offset)`.
pub type BlockCache = Mutex<Cache<(u64, u64), Arc<Block>>>;

/// An open, immutable table.
///
/// The file handle persists for the table's lifetime behind a mutex that
/// serialises the seek+read pairs of concurrent block fetches. Reads of
/// the in-memory index and filter take no lock.
pub struct Table {
    options: Options,
    file: Mutex<File>,
    index_block: Arc<Block>,
    filter: Option<(BloomFilterPolicy, Vec<u8>)>,
    block_cache: Option<Arc<BlockCache>>,
    cache_id: u64,
}

impl Table {
    /// Opens the table at `path`, reading the footer, index block and
    /// (if the table carries one) the bloom filter.
    pub fn open(
        options: Options,
        path: &Path,
        file_size: u64,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Table> {
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::Corruption(
                "file is too short to be a table".into(),
            ));
        }
        let mut file = File::open(path)?;

        let mut footer_bytes = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE as u64))?;
        file.read_exact(&mut footer_bytes)?;
        let footer = Footer::decode_from(&footer_bytes)?;

        let verify = options.paranoid_checks;
        let index_contents = read_block_at(&mut file, &footer.index_handle, verify)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let mut table = Table {
            options,
            file: Mutex::new(file),
            index_block,
            filter: None,
            block_cache,
            cache_id: new_cache_id(),
        };
        table.read_filter(&footer)?;
        Ok(table)
    }

    /// Locates the filter block through the metaindex and loads it. A
    /// table without the expected filter entry just reads unfiltered.
    fn read_filter(&mut self, footer: &Footer) -> Result<()> {
        if self.options.bloom_bits_per_key == 0 {
            return Ok(());
        }
        let meta_contents = {
            let mut file = self.file.lock();
            read_block_at(&mut file, &footer.metaindex_handle, self.options.paranoid_checks)?
        };
        let meta_block = Arc::new(Block::new(meta_contents)?);
        let mut iter = BlockIter::new(meta_block, Arc::new(BytewiseComparator));
        let key = format!("filter.{}", bloom::FILTER_POLICY_NAME);
        iter.seek(key.as_bytes());
        if iter.valid() && iter.key() == key.as_bytes() {
            let mut cursor = iter.value();
            let handle = BlockHandle::decode_from(&mut cursor)?;
            // The filter block is stored raw; read its contents without
            // the trailer.
            let mut contents = vec![0u8; handle.size as usize];
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(handle.offset))?;
            file.read_exact(&mut contents)?;
            self.filter = Some((
                BloomFilterPolicy::new(self.options.bloom_bits_per_key),
                contents,
            ));
        }
        Ok(())
    }

    /// Reads (possibly via the block cache) the data block for a handle.
    fn block(&self, handle: &BlockHandle, read_options: &ReadOptions) -> Result<Arc<Block>> {
        let cache_key = (self.cache_id, handle.offset);
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.lock().get(&cache_key) {
                return Ok(block);
            }
        }

        let verify = read_options.verify_checksums || self.options.paranoid_checks;
        let contents = {
            let mut file = self.file.lock();
            read_block_at(&mut file, handle, verify)?
        };
        let block = Arc::new(Block::new(contents)?);

        if let Some(cache) = &self.block_cache {
            if read_options.fill_cache {
                cache
                    .lock()
                    .insert(cache_key, Arc::clone(&block), block.size());
            }
        }
        Ok(block)
    }

    /// Iterator over the whole table in key order. Takes (a clone of)
    /// the shared handle: the iterator keeps the table alive.
    pub fn iter(self: Arc<Self>, read_options: ReadOptions) -> impl InternalIterator {
        let cmp = self.options.comparator.clone();
        let index_iter = BlockIter::new(Arc::clone(&self.index_block), cmp.clone());
        let table = self;
        TwoLevelIterator::new(index_iter, move |handle_bytes: &[u8]| {
            let mut cursor = handle_bytes;
            match BlockHandle::decode_from(&mut cursor) {
                Ok(handle) => match table.block(&handle, &read_options) {
                    Ok(block) => Box::new(BlockIter::new(block, cmp.clone())) as Box<dyn InternalIterator>,
                    Err(e) => Box::new(ErrorIterator::new(e)),
                },
                Err(e) => Box::new(ErrorIterator::new(e)),
            }
        })
    }

    /// Point lookup: seeks the index, consults the filter, then reads at
    /// most one data block. `save` observes the entry found at or after
    /// `key` within that block, if any.
    pub fn internal_get(
        &self,
        read_options: &ReadOptions,
        key: &[u8],
        save: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let mut index_iter = BlockIter::new(Arc::clone(&self.index_block), self.options.comparator.clone());
        index_iter.seek(key);
        if !index_iter.valid() {
            return index_iter.status();
        }

        if let Some((policy, filter)) = &self.filter {
            let filter_key = if key.len() >= 8 { extract_user_key(key) } else { key };
            if !policy.key_may_match(filter_key, filter) {
                return Ok(());
            }
        }

        let mut cursor = index_iter.value();
        let handle = BlockHandle::decode_from(&mut cursor)?;
        let block = self.block(&handle, read_options)?;
        let mut block_iter = BlockIter::new(block, self.options.comparator.clone());
        block_iter.seek(key);
        if block_iter.valid() {
            save(block_iter.key(), block_iter.value());
        }
        block_iter.status()
    }

    /// Conservative filter probe with a plain user key; `true` when the
    /// table has no filter.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        match &self.filter {
            Some((policy, filter)) => policy.key_may_match(user_key, filter),
            None => true,
        }
    }
}

/// Reads `contents || type || crc` at a handle, verifies and decodes.
fn read_block_at(file: &mut File, handle: &BlockHandle, verify_checksum: bool) -> Result<Vec<u8>> {
    let total = handle.size as usize + BLOCK_TRAILER_SIZE;
    let mut buf = vec![0u8; total];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf)
        .map_err(|_| Error::Corruption("truncated block read".into()))?;

    let n = handle.size as usize;
    if verify_checksum {
        let stored = codec::crc32c::unmask(codec::decode_fixed32(&buf[n + 1..n + 5]));
        let mut hasher = codec::crc32c::Hasher::new();
        hasher.update(&buf[..n + 1]);
        if hasher.finalize() != stored {
            return Err(Error::Corruption("block checksum mismatch".into()));
        }
    }

    let tag = buf[n];
    buf.truncate(n);
    decompress_block(tag, buf)
}
