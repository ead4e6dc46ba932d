//! Streaming table writer.
//!
//! Keys arrive in strictly increasing order (internal-key order for the
//! engine's tables). Data blocks are cut when they reach the configured
//! block size; each finished block contributes one index entry whose key
//! is a short separator between the block's last key and the next
//! block's first key, computed with the comparator's shortening hooks so
//! index blocks stay small.

use std::fs::File;
use std::io::Write;

use bloom::BloomFilterPolicy;
use types::{extract_user_key, CompressionType, Options, Result};

use crate::block::BlockBuilder;
use crate::compress::compress_block;
use crate::format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE};

pub struct TableBuilder {
    options: Options,
    file: File,
    offset: u64,
    num_entries: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    /// A data block was finished but its index entry is deferred until
    /// the next key arrives (the separator needs both sides).
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    /// User keys feeding the table's bloom filter.
    filter_keys: Vec<Vec<u8>>,
    finished: bool,
}

impl TableBuilder {
    /// Starts a table at the beginning of `file`. `options.comparator`
    /// must order the keys that will be added; for engine tables that is
    /// the internal-key comparator.
    pub fn new(options: Options, file: File) -> Self {
        let data_block = BlockBuilder::new(
            options.block_restart_interval,
            options.comparator.clone(),
        );
        // Index keys are far apart; prefix compression buys nothing, so
        // every entry is a restart point.
        let index_block = BlockBuilder::new(1, options.comparator.clone());
        Self {
            options,
            file,
            offset: 0,
            num_entries: 0,
            data_block,
            index_block,
            last_key: Vec::new(),
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            filter_keys: Vec::new(),
            finished: false,
        }
    }

    /// Appends an entry. Keys must be strictly increasing under the
    /// table's comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.finished);
        debug_assert!(
            self.num_entries == 0
                || self.options.comparator.compare(key, &self.last_key)
                    == std::cmp::Ordering::Greater,
            "table keys added out of order"
        );

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let handle_encoding = self.pending_handle.encoded();
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if self.options.bloom_bits_per_key > 0 {
            // Engine tables carry internal keys; filters are over user
            // keys so probes with plain user keys can hit.
            let filter_key = if key.len() >= 8 { extract_user_key(key) } else { key };
            self.filter_keys.push(filter_key.to_vec());
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Cuts the current data block, if any.
    fn flush(&mut self) -> Result<()> {
        debug_assert!(!self.finished);
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);
        self.pending_handle = self.write_data_block()?;
        self.pending_index_entry = true;
        self.file.flush()?;
        Ok(())
    }

    fn write_data_block(&mut self) -> Result<BlockHandle> {
        let compression = self.options.compression;
        let raw = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.write_block_contents(&raw, compression)
    }

    fn write_block_contents(
        &mut self,
        raw: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let (contents, compression_used) = compress_block(compression, raw);
        self.write_raw_block(&contents, compression_used)
    }

    /// Writes `contents || type || masked_crc` and returns the handle of
    /// the contents.
    fn write_raw_block(
        &mut self,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.file.write_all(contents)?;

        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = compression as u8;
        let mut hasher = codec::crc32c::Hasher::new();
        hasher.update(contents);
        hasher.update(&trailer[..1]);
        let crc = codec::crc32c::mask(hasher.finalize());
        trailer[1..].copy_from_slice(&crc.to_le_bytes());
        self.file.write_all(&trailer)?;

        self.offset += contents.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Writes the filter, metaindex and index blocks plus the footer,
    /// syncs, and returns the final file size.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        debug_assert!(!self.finished);
        self.finished = true;

        // Filter block: uncompressed, whole-table bloom over user keys.
        let mut filter_handle = None;
        if self.options.bloom_bits_per_key > 0 {
            let policy = BloomFilterPolicy::new(self.options.bloom_bits_per_key);
            let keys: Vec<&[u8]> = self.filter_keys.iter().map(|k| k.as_slice()).collect();
            let mut filter_contents = Vec::new();
            policy.create_filter(&keys, &mut filter_contents);
            filter_handle =
                Some(self.write_raw_block(&filter_contents, CompressionType::None)?);
        }

        // Metaindex block: maps "filter.<policy>" to the filter handle.
        let metaindex_handle = {
            let mut metaindex = BlockBuilder::new(
                self.options.block_restart_interval,
                std::sync::Arc::new(types::BytewiseComparator),
            );
            if let Some(handle) = filter_handle {
                let key = format!("filter.{}", bloom::FILTER_POLICY_NAME);
                metaindex.add(key.as_bytes(), &handle.encoded());
            }
            let raw = metaindex.finish().to_vec();
            let compression = self.options.compression;
            self.write_block_contents(&raw, compression)?
        };

        // Index block: flush the deferred entry for the final data block.
        if self.pending_index_entry {
            self.options.comparator.find_short_successor(&mut self.last_key);
            let handle_encoding = self.pending_handle.encoded();
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }
        let index_handle = {
            let raw = self.index_block.finish().to_vec();
            let compression = self.options.compression;
            self.write_block_contents(&raw, compression)?
        };

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = Vec::new();
        footer.encode_to(&mut footer_encoding);
        self.file.write_all(&footer_encoding)?;
        self.offset += footer_encoding.len() as u64;

        self.file.flush()?;
        self.file.sync_all()?;
        Ok(self.offset)
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; the final file size once `finish` returns.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
