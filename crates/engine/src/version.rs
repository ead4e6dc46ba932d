//! Immutable snapshots of the on-disk file set.
//!
//! A `Version` is one consistent view of the leveled tree: a vector of
//! file metadata per level plus the precomputed best compaction
//! candidate. Versions are shared as `Arc`s: the version set holds the
//! current one, iterators and compactions pin whichever one they
//! started from. File metadata is likewise `Arc`-shared across versions;
//! when a compaction deletes a file from the tree the metadata is marked
//! and the physical file is unlinked once the last snapshot referencing
//! it drops.

use std::cmp::Ordering as CmpOrdering;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use types::{
    Comparator, InternalKey, InternalKeyComparator, LookupKey, ReadOptions, Result, ValueType,
    NUM_LEVELS,
};

use crate::table_cache::TableCache;

/// Shared metadata for one table file.
pub(crate) struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    /// Seeks this file may absorb before it becomes a compaction
    /// candidate; decremented under the DB mutex.
    pub allowed_seeks: AtomicI64,
    path: PathBuf,
    deleted: AtomicBool,
}

impl FileMetaData {
    pub(crate) fn new(
        path: PathBuf,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) -> FileMetaData {
        // One seek costs roughly the same as compacting 16 KiB; floor it
        // so tiny files are not compacted after a handful of misses.
        let allowed = (file_size as i64 / 16384).max(100);
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed),
            path,
            deleted: AtomicBool::new(false),
        }
    }

    /// Requests physical deletion once the last referencing snapshot or
    /// iterator lets go.
    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}

impl Drop for FileMetaData {
    fn drop(&mut self) {
        if self.deleted.load(Ordering::Acquire) {
            tracing::debug!(number = self.number, "removing obsolete table file");
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl std::fmt::Debug for FileMetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMetaData")
            .field("number", &self.number)
            .field("file_size", &self.file_size)
            .finish()
    }
}

/// Outcome of a point lookup against one version.
pub(crate) enum VersionLookup {
    Found(Vec<u8>),
    Deleted,
    NotFound,
}

/// One immutable view of the tree.
pub(crate) struct Version {
    pub icmp: InternalKeyComparator,
    pub files: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
    /// Best size-compaction candidate, precomputed when the version is
    /// installed. A score >= 1 means the level is due.
    pub compaction_score: f64,
    pub compaction_level: usize,
    /// Armed by read stats when some file runs out of allowed seeks;
    /// mutated under the DB mutex.
    pub file_to_compact: Mutex<Option<(usize, Arc<FileMetaData>)>>,
}

impl Version {
    pub(crate) fn empty(icmp: InternalKeyComparator) -> Version {
        Version {
            icmp,
            files: Default::default(),
            compaction_score: -1.0,
            compaction_level: 0,
            file_to_compact: Mutex::new(None),
        }
    }

    /// Point lookup across the levels, newest first. Also reports the
    /// first file that was consulted without answering, when more than
    /// one file had to be read; the caller charges it a seek.
    pub(crate) fn get(
        &self,
        options: &ReadOptions,
        key: &LookupKey,
        table_cache: &TableCache,
    ) -> (Result<VersionLookup>, Option<(usize, Arc<FileMetaData>)>) {
        let ikey = key.internal_key();
        let user_key = key.user_key();
        let ucmp = self.icmp.user_comparator().clone();

        let mut seek_stat: Option<(usize, Arc<FileMetaData>)> = None;
        let mut last_file_read: Option<(usize, Arc<FileMetaData>)> = None;

        for level in 0..NUM_LEVELS {
            let candidates = self.files_for_key(level, ikey, user_key, &*ucmp);
            for file in candidates {
                if seek_stat.is_none() {
                    if let Some(prev) = last_file_read.take() {
                        // Second file consulted for this lookup: the
                        // first one wasted a seek.
                        seek_stat = Some(prev);
                    }
                }
                last_file_read = Some((level, Arc::clone(&file)));

                let mut found: Option<(Vec<u8>, ValueType)> = None;
                let mut corrupt = false;
                let status = table_cache.get(
                    options,
                    file.number,
                    file.file_size,
                    ikey,
                    &mut |found_key, found_value| {
                        match types::parse_internal_key(found_key) {
                            Some(parsed) => {
                                if ucmp.compare(parsed.user_key, user_key)
                                    == CmpOrdering::Equal
                                {
                                    found =
                                        Some((found_value.to_vec(), parsed.value_type));
                                }
                            }
                            None => corrupt = true,
                        }
                    },
                );
                if let Err(e) = status {
                    return (Err(e), seek_stat);
                }
                if corrupt {
                    return (
                        Err(types::Error::Corruption(
                            "corrupted internal key in table".into(),
                        )),
                        seek_stat,
                    );
                }
                match found {
                    Some((value, ValueType::Value)) => {
                        return (Ok(VersionLookup::Found(value)), seek_stat)
                    }
                    Some((_, ValueType::Deletion)) => {
                        return (Ok(VersionLookup::Deleted), seek_stat)
                    }
                    None => {} // keep looking in older files
                }
            }
        }
        (Ok(VersionLookup::NotFound), seek_stat)
    }

    /// Files that may hold `user_key` at `level`: every overlapping L0
    /// file newest first, or the single binary-searched candidate on the
    /// disjoint levels.
    fn files_for_key(
        &self,
        level: usize,
        ikey: &[u8],
        user_key: &[u8],
        ucmp: &dyn Comparator,
    ) -> Vec<Arc<FileMetaData>> {
        let files = &self.files[level];
        if files.is_empty() {
            return Vec::new();
        }
        if level == 0 {
            let mut overlapping: Vec<Arc<FileMetaData>> = files
                .iter()
                .filter(|f| {
                    ucmp.compare(user_key, f.smallest.user_key()) != CmpOrdering::Less
                        && ucmp.compare(user_key, f.largest.user_key()) != CmpOrdering::Greater
                })
                .cloned()
                .collect();
            overlapping.sort_by(|a, b| b.number.cmp(&a.number));
            overlapping
        } else {
            let index = find_file(&self.icmp, files, ikey);
            if index >= files.len() {
                return Vec::new();
            }
            let file = &files[index];
            if ucmp.compare(user_key, file.smallest.user_key()) == CmpOrdering::Less {
                Vec::new()
            } else {
                vec![Arc::clone(file)]
            }
        }
    }

    /// Charges one seek against a file; true when the version now has a
    /// seek-compaction candidate. Called with the DB mutex held.
    pub(crate) fn update_stats(&self, stat: Option<(usize, Arc<FileMetaData>)>) -> bool {
        if let Some((level, file)) = stat {
            let remaining = file.allowed_seeks.fetch_sub(1, Ordering::Relaxed) - 1;
            let mut candidate = self.file_to_compact.lock();
            if remaining <= 0 && candidate.is_none() {
                *candidate = Some((level, file));
                return true;
            }
        }
        false
    }

    /// All files at `level` whose user-key range overlaps
    /// `[smallest, largest]` (either bound may be `None` for open
    /// ranges). On level 0 the range is widened until it is closed under
    /// overlap, since L0 files may overlap each other.
    pub(crate) fn overlapping_inputs(
        &self,
        level: usize,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator().clone();
        let mut begin = smallest.map(|s| s.to_vec());
        let mut end = largest.map(|l| l.to_vec());
        let mut inputs: Vec<Arc<FileMetaData>> = Vec::new();

        'restart: loop {
            inputs.clear();
            for file in &self.files[level] {
                let file_start = file.smallest.user_key();
                let file_limit = file.largest.user_key();
                if matches!(&begin, Some(b) if ucmp.compare(file_limit, b) == CmpOrdering::Less) {
                    continue; // wholly before the range
                }
                if matches!(&end, Some(e) if ucmp.compare(file_start, e) == CmpOrdering::Greater) {
                    continue; // wholly after the range
                }
                inputs.push(Arc::clone(file));
                if level == 0 {
                    // L0 files may overlap each other: grow the range and
                    // rescan so the input set is closed under overlap.
                    if matches!(&begin, Some(b) if ucmp.compare(file_start, b) == CmpOrdering::Less)
                    {
                        begin = Some(file_start.to_vec());
                        continue 'restart;
                    }
                    if matches!(&end, Some(e) if ucmp.compare(file_limit, e) == CmpOrdering::Greater)
                    {
                        end = Some(file_limit.to_vec());
                        continue 'restart;
                    }
                }
            }
            return inputs;
        }
    }

}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Version");
        for (level, files) in self.files.iter().enumerate() {
            if !files.is_empty() {
                s.field(&format!("level{level}"), &files.len());
            }
        }
        s.finish()
    }
}

/// Index of the first file whose largest key is >= `ikey` in a list
/// sorted by largest key (levels above 0).
pub(crate) fn find_file(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
    ikey: &[u8],
) -> usize {
    let mut left = 0usize;
    let mut right = files.len();
    while left < right {
        let mid = (left + right) / 2;
        if icmp.compare(files[mid].largest.encoded(), ikey) == CmpOrdering::Less {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    right
}

/// Total bytes in a file list.
pub(crate) fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}
