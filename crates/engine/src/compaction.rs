//! State carried through one compaction: the chosen inputs, the edit
//! being accumulated, and the bookkeeping that bounds output files by
//! grandparent overlap.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

use types::{Comparator, InternalKeyComparator, NUM_LEVELS};

use crate::version::{total_file_size, FileMetaData, Version};
use crate::version_edit::VersionEdit;

/// Cap on bytes of level-L+2 data a single output file may overlap.
/// Outputs are cut early rather than creating a file whose own eventual
/// compaction would have to rewrite more than this.
pub(crate) const MAX_GRANDPARENT_OVERLAP_BYTES: u64 = 10 * 1024 * 1024;

pub(crate) struct Compaction {
    level: usize,
    max_output_file_size: u64,
    icmp: InternalKeyComparator,
    /// Pins every input file for the duration of the compaction.
    input_version: Arc<Version>,
    pub(crate) edit: VersionEdit,
    /// `inputs[0]` at `level`, `inputs[1]` at `level + 1`.
    inputs: [Vec<Arc<FileMetaData>>; 2],
    grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
    /// Per-level scan positions for `is_base_level_for_key`; valid
    /// because compaction keys arrive in increasing order.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(
        level: usize,
        max_output_file_size: u64,
        icmp: InternalKeyComparator,
        input_version: Arc<Version>,
        level_inputs: Vec<Arc<FileMetaData>>,
    ) -> Compaction {
        Compaction {
            level,
            max_output_file_size,
            icmp,
            input_version,
            edit: VersionEdit::new(),
            inputs: [level_inputs, Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    pub(crate) fn level(&self) -> usize {
        self.level
    }

    pub(crate) fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    pub(crate) fn inputs(&self, which: usize) -> &[Arc<FileMetaData>] {
        &self.inputs[which]
    }

    pub(crate) fn set_parent_inputs(&mut self, files: Vec<Arc<FileMetaData>>) {
        self.inputs[1] = files;
    }

    pub(crate) fn set_grandparents(&mut self, files: Vec<Arc<FileMetaData>>) {
        self.grandparents = files;
    }

    /// A compaction that moves a single file down a level untouched: no
    /// parents to merge with, and little enough grandparent overlap that
    /// the moved file will not become disproportionately expensive to
    /// compact later.
    pub(crate) fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1
            && self.inputs[1].is_empty()
            && total_file_size(&self.grandparents) <= MAX_GRANDPARENT_OVERLAP_BYTES
    }

    /// Records the deletion of every input file in the edit.
    pub(crate) fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for f in &self.inputs[which] {
                self.edit.delete_file(self.level + which, f.number);
            }
        }
    }

    /// True when no level beyond the compaction's output can contain
    /// `user_key`, judged by key ranges only; the executor follows up
    /// with bloom probes on the output-level files.
    pub(crate) fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator().clone();
        for level in self.level + 2..NUM_LEVELS {
            let files = &self.input_version.files[level];
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest.user_key()) != CmpOrdering::Greater {
                    if ucmp.compare(user_key, f.smallest.user_key()) != CmpOrdering::Less {
                        return false;
                    }
                    break;
                }
                // Keys only grow during a compaction, so this file is
                // behind us for good.
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// True when the output file being built should be closed before
    /// `internal_key` to keep its grandparent overlap bounded.
    pub(crate) fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && self.icmp.compare(
                internal_key,
                self.grandparents[self.grandparent_index].largest.encoded(),
            ) == CmpOrdering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > MAX_GRANDPARENT_OVERLAP_BYTES {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}
