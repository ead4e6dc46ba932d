//! Ownership of the version history: the current [`Version`], the
//! monotonic counters, compaction pointers, and the logic that applies a
//! [`VersionEdit`] to produce the next version.
//!
//! The MANIFEST file itself is written by the database facade (which
//! manages when the mutex may be dropped around I/O); this module
//! produces and consumes the records.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use types::{
    Comparator, Error, InternalKey, InternalKeyComparator, Options, Result, SequenceNumber,
    L0_COMPACTION_TRIGGER, NUM_LEVELS,
};

use crate::compaction::Compaction;
use crate::filename::{read_current_file, table_file_name};
use crate::version::{total_file_size, FileMetaData, Version};
use crate::version_edit::VersionEdit;

/// Level-1 size target; each deeper level is ten times larger.
fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1048576.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

pub(crate) struct VersionSet {
    dbname: PathBuf,
    options: Options,
    icmp: InternalKeyComparator,
    pub(crate) next_file_number: u64,
    pub(crate) manifest_file_number: u64,
    pub(crate) last_sequence: SequenceNumber,
    pub(crate) log_number: u64,
    pub(crate) prev_log_number: u64,
    current: Arc<Version>,
    /// Largest internal key written by the last compaction at each
    /// level; the next size compaction resumes after it (round-robin
    /// over the key space). Persisted in MANIFEST snapshots.
    pub(crate) compact_pointer: [Vec<u8>; NUM_LEVELS],
}

impl VersionSet {
    pub(crate) fn new(dbname: PathBuf, options: Options, icmp: InternalKeyComparator) -> Self {
        let current = Arc::new(Version::empty(icmp.clone()));
        VersionSet {
            dbname,
            options,
            icmp,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            current,
            compact_pointer: Default::default(),
        }
    }

    pub(crate) fn current(&self) -> &Arc<Version> {
        &self.current
    }

    pub(crate) fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    pub(crate) fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub(crate) fn num_level_files(&self, level: usize) -> usize {
        self.current.files[level].len()
    }

    pub(crate) fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.current.files[level])
    }

    /// Fills in the bookkeeping fields every persisted edit must carry.
    pub(crate) fn normalize_edit(&self, edit: &mut VersionEdit) {
        if edit.log_number.is_none() {
            edit.log_number = Some(self.log_number);
        }
        if edit.prev_log_number.is_none() {
            edit.prev_log_number = Some(self.prev_log_number);
        }
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);
    }

    /// Applies a (normalized) edit to the current version, producing the
    /// version that will become current if the manifest write succeeds.
    /// Also advances the in-memory compaction pointers.
    pub(crate) fn build_version(&mut self, edit: &VersionEdit) -> Arc<Version> {
        for (level, key) in &edit.compact_pointers {
            self.compact_pointer[*level] = key.encoded().to_vec();
        }

        let mut new_version = Version::empty(self.icmp.clone());
        for level in 0..NUM_LEVELS {
            let mut deleted: HashSet<u64> = edit
                .deleted_files
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, n)| *n)
                .collect();

            let mut files: Vec<Arc<FileMetaData>> = Vec::new();
            for f in &edit.new_files {
                if f.level == level {
                    deleted.remove(&f.number);
                    files.push(Arc::new(FileMetaData::new(
                        table_file_name(&self.dbname, f.number),
                        f.number,
                        f.file_size,
                        f.smallest.clone(),
                        f.largest.clone(),
                    )));
                }
            }
            files.extend(
                self.current.files[level]
                    .iter()
                    .filter(|f| !deleted.contains(&f.number))
                    .cloned(),
            );

            let icmp = &self.icmp;
            files.sort_by(|a, b| {
                icmp.compare(a.smallest.encoded(), b.smallest.encoded())
                    .then_with(|| a.number.cmp(&b.number))
            });

            #[cfg(debug_assertions)]
            if level > 0 {
                for pair in files.windows(2) {
                    debug_assert!(
                        icmp.compare(pair[0].largest.encoded(), pair[1].smallest.encoded())
                            == CmpOrdering::Less,
                        "overlapping files installed at level {level}"
                    );
                }
            }

            new_version.files[level] = files;
        }

        Self::finalize(&mut new_version);
        Arc::new(new_version)
    }

    /// Precomputes the best size-compaction candidate for a version
    /// about to be installed.
    fn finalize(v: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0f64;

        for level in 0..NUM_LEVELS - 1 {
            let score = if level == 0 {
                // Level 0 is scored by file count: every read merges all
                // L0 files, so many small ones hurt long before their
                // bytes do.
                v.files[0].len() as f64 / L0_COMPACTION_TRIGGER as f64
            } else {
                total_file_size(&v.files[level]) as f64 / max_bytes_for_level(level)
            };
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }
        v.compaction_level = best_level;
        v.compaction_score = best_score;
    }

    /// Makes `v` current and records the edit's log numbers. Called only
    /// after the edit has been durably appended to the MANIFEST.
    pub(crate) fn install_version(&mut self, v: Arc<Version>, edit: &VersionEdit) {
        self.current = v;
        if let Some(n) = edit.log_number {
            self.log_number = n;
        }
        if let Some(n) = edit.prev_log_number {
            self.prev_log_number = n;
        }
    }

    /// An edit describing the entire current state; the first record of
    /// every MANIFEST file.
    pub(crate) fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some(self.options.comparator.name().to_string());
        for (level, pointer) in self.compact_pointer.iter().enumerate() {
            if !pointer.is_empty() {
                edit.set_compact_pointer(level, InternalKey::decode(pointer));
            }
        }
        for (level, files) in self.current.files.iter().enumerate() {
            for f in files {
                edit.add_file(
                    level,
                    f.number,
                    f.file_size,
                    f.smallest.clone(),
                    f.largest.clone(),
                );
            }
        }
        edit
    }

    /// Rebuilds state from `CURRENT` and the MANIFEST it names. A fresh
    /// directory (no `CURRENT`) leaves the defaults in place. Always
    /// allocates a new manifest file number; every open starts a new
    /// MANIFEST seeded with a snapshot.
    pub(crate) fn recover(&mut self) -> Result<()> {
        if let Some(manifest_name) = read_current_file(&self.dbname)? {
            let path = self.dbname.join(&manifest_name);
            let mut reader = wal::Reader::open(&path)
                .map_err(|e| Error::Io(format!("cannot open {manifest_name}: {e}")))?;

            let mut have_log_number = false;
            let mut have_next_file = false;
            let mut have_last_sequence = false;
            let mut scratch = Vec::new();
            loop {
                match reader.read_record(&mut scratch) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        return Err(Error::Corruption(format!(
                            "manifest {manifest_name}: {e}"
                        )))
                    }
                }
                let edit = VersionEdit::decode_from(&scratch)?;

                if let Some(name) = &edit.comparator_name {
                    if name != self.options.comparator.name() {
                        return Err(Error::InvalidArgument(format!(
                            "comparator mismatch: database uses {name}, options supply {}",
                            self.options.comparator.name()
                        )));
                    }
                }

                let version = self.build_version(&edit);
                self.current = version;

                if let Some(n) = edit.log_number {
                    self.log_number = n;
                    have_log_number = true;
                }
                if let Some(n) = edit.prev_log_number {
                    self.prev_log_number = n;
                }
                if let Some(n) = edit.next_file_number {
                    self.next_file_number = n;
                    have_next_file = true;
                }
                if let Some(n) = edit.last_sequence {
                    self.last_sequence = n;
                    have_last_sequence = true;
                }
            }

            if !have_log_number || !have_next_file || !have_last_sequence {
                return Err(Error::Corruption(
                    "manifest is missing required metadata".into(),
                ));
            }
            self.mark_file_number_used(self.log_number);
            self.mark_file_number_used(self.prev_log_number);
            tracing::info!(
                manifest = %manifest_name,
                last_sequence = self.last_sequence,
                log_number = self.log_number,
                "recovered version state"
            );
        }

        self.manifest_file_number = self.new_file_number();
        Ok(())
    }

    /// File numbers referenced by the current version; used by the
    /// open-time sweep of the database directory.
    pub(crate) fn live_files(&self) -> HashSet<u64> {
        self.current
            .files
            .iter()
            .flat_map(|files| files.iter().map(|f| f.number))
            .collect()
    }

    // -- compaction planning -------------------------------------------

    /// Chooses the next compaction, size-triggered compactions first,
    /// then seek-triggered ones. `None` when the tree is in shape.
    pub(crate) fn pick_compaction(&mut self) -> Option<Compaction> {
        let size_compaction = self.current.compaction_score >= 1.0;
        let seek_compaction = self.current.file_to_compact.lock().is_some();

        let (level, mut inputs) = if size_compaction {
            let level = self.current.compaction_level;
            debug_assert!(level + 1 < NUM_LEVELS);

            // Resume after the last key compacted at this level, wrapping
            // to the start of the key space.
            let mut picked = None;
            for f in &self.current.files[level] {
                if self.compact_pointer[level].is_empty()
                    || self
                        .icmp
                        .compare(f.largest.encoded(), &self.compact_pointer[level])
                        == CmpOrdering::Greater
                {
                    picked = Some(Arc::clone(f));
                    break;
                }
            }
            let picked = picked.or_else(|| self.current.files[level].first().cloned())?;
            (level, vec![picked])
        } else if seek_compaction {
            let (level, file) = self.current.file_to_compact.lock().clone()?;
            (level, vec![file])
        } else {
            return None;
        };

        // Level-0 inputs must be closed under overlap, since L0 files
        // may overlap each other.
        if level == 0 {
            let smallest = inputs[0].smallest.user_key().to_vec();
            let largest = inputs[0].largest.user_key().to_vec();
            inputs = self
                .current
                .overlapping_inputs(0, Some(&smallest), Some(&largest));
            debug_assert!(!inputs.is_empty());
        }

        let mut c = Compaction::new(
            level,
            self.options.max_file_size,
            self.icmp.clone(),
            Arc::clone(&self.current),
            inputs,
        );
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// Completes a compaction's input set: the overlapping parent files,
    /// the grandparents that bound output size, and the advanced
    /// compaction pointer.
    fn setup_other_inputs(&mut self, c: &mut Compaction) {
        let level = c.level();

        let (mut smallest, mut largest) = self.key_range(c.inputs(0));
        c.set_parent_inputs(self.current.overlapping_inputs(
            level + 1,
            Some(smallest.user_key()),
            Some(largest.user_key()),
        ));

        // The parents may widen the range covered by the compaction.
        if !c.inputs(1).is_empty() {
            let (all_smallest, all_largest) =
                self.key_range_of(c.inputs(0).iter().chain(c.inputs(1).iter()));
            smallest = all_smallest;
            largest = all_largest;
        }

        if level + 2 < NUM_LEVELS {
            c.set_grandparents(self.current.overlapping_inputs(
                level + 2,
                Some(smallest.user_key()),
                Some(largest.user_key()),
            ));
        }

        // Advance the pointer immediately rather than waiting for the
        // edit to apply: if this compaction fails, the next attempt
        // covers a different key range.
        self.compact_pointer[level] = largest.encoded().to_vec();
        c.edit.set_compact_pointer(level, largest);
    }

    fn key_range(&self, files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
        self.key_range_of(files.iter())
    }

    fn key_range_of<'a>(
        &self,
        files: impl Iterator<Item = &'a Arc<FileMetaData>>,
    ) -> (InternalKey, InternalKey) {
        let mut smallest: Option<InternalKey> = None;
        let mut largest: Option<InternalKey> = None;
        for f in files {
            if smallest.as_ref().map_or(true, |s| {
                self.icmp.compare(f.smallest.encoded(), s.encoded()) == CmpOrdering::Less
            }) {
                smallest = Some(f.smallest.clone());
            }
            if largest.as_ref().map_or(true, |l| {
                self.icmp.compare(f.largest.encoded(), l.encoded()) == CmpOrdering::Greater
            }) {
                largest = Some(f.largest.clone());
            }
        }
        (smallest.unwrap(), largest.unwrap())
    }
}
