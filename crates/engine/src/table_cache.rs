//! Bounded pool of open tables.
//!
//! Maps a file number to an open [`Table`], opening on miss and evicting
//! least-recently-used entries beyond `max_open_files`. Tables are
//! shared as `Arc`s, so an iterator obtained from the cache keeps its
//! table (and the table its file handle) alive even if the entry is
//! evicted or the file is later deleted by a compaction.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sstable::cache::Cache;
use sstable::{BlockCache, Table};
use types::{ErrorIterator, InternalIterator, Options, ReadOptions, Result};

use crate::filename::table_file_name;

pub(crate) struct TableCache {
    dbname: PathBuf,
    /// Table-level options; the comparator here is the internal-key
    /// comparator, since tables store internal keys.
    options: Options,
    cache: Mutex<Cache<u64, Arc<Table>>>,
    block_cache: Option<Arc<BlockCache>>,
}

impl TableCache {
    pub(crate) fn new(dbname: PathBuf, options: Options) -> TableCache {
        let capacity = options.max_open_files;
        let block_cache = if options.block_cache_capacity > 0 {
            Some(Arc::new(Mutex::new(Cache::new(
                options.block_cache_capacity,
            ))))
        } else {
            None
        };
        TableCache {
            dbname,
            options,
            cache: Mutex::new(Cache::new(capacity)),
            block_cache,
        }
    }

    fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        if let Some(table) = self.cache.lock().get(&file_number) {
            return Ok(table);
        }
        // The open happens outside the cache lock: it reads the footer,
        // index and filter from disk.
        let path = table_file_name(&self.dbname, file_number);
        let table = Arc::new(Table::open(
            self.options.clone(),
            &path,
            file_size,
            self.block_cache.clone(),
        )?);
        self.cache
            .lock()
            .insert(file_number, Arc::clone(&table), 1);
        Ok(table)
    }

    /// Iterator over one table; an error iterator when the table cannot
    /// be opened, so merge trees surface the failure through `status`.
    pub(crate) fn iter(
        &self,
        read_options: ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> Box<dyn InternalIterator> {
        match self.find_table(file_number, file_size) {
            Ok(table) => Box::new(table.iter(read_options)),
            Err(e) => Box::new(ErrorIterator::new(e)),
        }
    }

    /// Point lookup inside one table; `save` observes the entry found at
    /// or after the internal key, if the filter does not rule it out.
    pub(crate) fn get(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
        save: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let table = self.find_table(file_number, file_size)?;
        table.internal_get(read_options, internal_key, save)
    }

    /// Bloom probe for compaction's tombstone analysis. Conservatively
    /// true when the table has no filter or cannot be opened.
    pub(crate) fn may_contain(&self, file_number: u64, file_size: u64, user_key: &[u8]) -> bool {
        match self.find_table(file_number, file_size) {
            Ok(table) => table.may_contain(user_key),
            Err(_) => true,
        }
    }

    /// Drops the cached handle for a deleted file.
    pub(crate) fn evict(&self, file_number: u64) {
        self.cache.lock().erase(&file_number);
    }
}
