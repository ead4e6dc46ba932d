//! The read path: snapshot the memtables and current version under the
//! mutex, then search without it.

use std::sync::Arc;

use codec::decode_fixed64;
use memtable::{LookupResult, MemTableIterator};
use types::{
    Error, ErrorIterator, InternalIterator, LookupKey, ReadOptions, Result, NUM_LEVELS,
};

use crate::iterator::{DbIterator, LevelFileNumIterator, MergingIterator};
use crate::version::VersionLookup;
use crate::Db;

impl Db {
    /// Looks up `key`, returning the newest value visible at the moment
    /// the call started. `Ok(None)` means the key is absent (or
    /// deleted); it is not an error.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let shared = &self.shared;

        // Pin the layers to search. Everything after this runs without
        // the mutex: memtables are lock-free for readers and the version
        // is immutable.
        let (mem, imm, version, sequence) = {
            let state = shared.state.lock();
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                Arc::clone(state.versions.current()),
                state.versions.last_sequence,
            )
        };

        let lookup = LookupKey::new(key, sequence);

        if let Some(hit) = mem.get(&lookup) {
            return Ok(match hit {
                LookupResult::Found(value) => Some(value),
                LookupResult::Deleted => None,
            });
        }
        if let Some(imm) = &imm {
            if let Some(hit) = imm.get(&lookup) {
                return Ok(match hit {
                    LookupResult::Found(value) => Some(value),
                    LookupResult::Deleted => None,
                });
            }
        }

        let (result, seek_stat) = version.get(options, &lookup, &shared.table_cache);

        // A lookup that had to touch more than one file charges the
        // first one a seek; enough wasted seeks promote the file to a
        // compaction candidate.
        if seek_stat.is_some() {
            let mut state = shared.state.lock();
            if version.update_stats(seek_stat) {
                shared.maybe_schedule_compaction(&mut state);
            }
        }

        match result? {
            VersionLookup::Found(value) => Ok(Some(value)),
            VersionLookup::Deleted | VersionLookup::NotFound => Ok(None),
        }
    }

    /// An iterator over the whole database as of this call. The iterator
    /// owns its snapshot: writes and compactions that happen later are
    /// invisible to it, and the files it reads stay alive (and on disk)
    /// until it is dropped.
    pub fn iter(&self, options: &ReadOptions) -> DbIterator {
        let shared = &self.shared;

        let (mem, imm, version, sequence) = {
            let state = shared.state.lock();
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                Arc::clone(state.versions.current()),
                state.versions.last_sequence,
            )
        };

        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        children.push(Box::new(MemTableIterator::new(mem)));
        if let Some(imm) = &imm {
            children.push(Box::new(MemTableIterator::new(Arc::clone(imm))));
        }

        // Level 0 files may overlap, so each joins the merge on its own;
        // deeper levels are disjoint and stream through a concatenating
        // iterator that opens one table at a time.
        for file in &version.files[0] {
            children.push(
                shared
                    .table_cache
                    .iter(*options, file.number, file.file_size),
            );
        }
        for level in 1..NUM_LEVELS {
            if !version.files[level].is_empty() {
                children.push(new_concatenating_iterator(
                    shared,
                    *options,
                    version.files[level].clone(),
                ));
            }
        }

        let merged = MergingIterator::new(shared.icmp.clone(), children);
        DbIterator::new(merged, shared.options.comparator.clone(), sequence)
    }
}

/// Lazily walks one disjoint level: an index over `(largest key → file)`
/// drives per-table iterators opened through the table cache.
fn new_concatenating_iterator(
    shared: &Arc<crate::DbShared>,
    options: ReadOptions,
    files: Vec<std::sync::Arc<crate::version::FileMetaData>>,
) -> Box<dyn InternalIterator> {
    let index = LevelFileNumIterator::new(shared.icmp.clone(), files);
    let table_cache = Arc::clone(&shared.table_cache);
    Box::new(sstable::TwoLevelIterator::new(
        index,
        move |file_value: &[u8]| -> Box<dyn InternalIterator> {
            if file_value.len() != 16 {
                return Box::new(ErrorIterator::new(Error::Corruption(
                    "file iterator handed a malformed handle".into(),
                )));
            }
            let number = decode_fixed64(&file_value[..8]);
            let size = decode_fixed64(&file_value[8..]);
            table_cache.iter(options, number, size)
        },
    ))
}
