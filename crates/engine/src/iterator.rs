//! Iterator composition: the k-way merge over heterogeneous children,
//! the per-level file iterator that feeds the concatenating two-level
//! iterator, and the user-facing [`DbIterator`] that collapses internal
//! keys into at most one visible entry per user key.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

use codec::put_fixed64;
use types::{
    extract_user_key, parse_internal_key, Comparator, InternalIterator, InternalKeyComparator,
    LookupKey, Result, SequenceNumber, ValueType,
};

use crate::version::FileMetaData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Wraps a child iterator, caching its validity and key so the merge
/// loop can compare children without re-borrowing them.
struct IteratorWrapper {
    iter: Box<dyn InternalIterator>,
    valid: bool,
    key: Vec<u8>,
}

impl IteratorWrapper {
    fn new(iter: Box<dyn InternalIterator>) -> Self {
        Self {
            iter,
            valid: false,
            key: Vec::new(),
        }
    }

    fn update(&mut self) {
        self.valid = self.iter.valid();
        if self.valid {
            self.key.clear();
            self.key.extend_from_slice(self.iter.key());
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.iter.seek(target);
        self.update();
    }

    fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
        self.update();
    }

    fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
        self.update();
    }

    fn next(&mut self) {
        self.iter.next();
        self.update();
    }

    fn prev(&mut self) {
        self.iter.prev();
        self.update();
    }
}

/// Merges N sorted children into one sorted stream. Duplicate keys are
/// not collapsed here; [`DbIterator`] owns that policy.
pub(crate) struct MergingIterator {
    cmp: InternalKeyComparator,
    children: Vec<IteratorWrapper>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub(crate) fn new(
        cmp: InternalKeyComparator,
        children: Vec<Box<dyn InternalIterator>>,
    ) -> MergingIterator {
        MergingIterator {
            cmp,
            children: children.into_iter().map(IteratorWrapper::new).collect(),
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if child.valid
                && smallest.map_or(true, |s| {
                    self.cmp.compare(&child.key, &self.children[s].key) == CmpOrdering::Less
                })
            {
                smallest = Some(i);
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if child.valid
                && largest.map_or(true, |l| {
                    self.cmp.compare(&child.key, &self.children[l].key) == CmpOrdering::Greater
                })
            {
                largest = Some(i);
            }
        }
        self.current = largest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        let current = self.current.unwrap();

        // After reverse movement the non-current children sit before the
        // current key; push them past it so the invariant "every other
        // child is positioned after key()" holds again.
        if self.direction != Direction::Forward {
            let key = self.children[current].key.clone();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                self.children[i].seek(&key);
                if self.children[i].valid
                    && self.cmp.compare(&key, &self.children[i].key) == CmpOrdering::Equal
                {
                    self.children[i].next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let current = self.current.unwrap();

        // Mirror image of next(): park every other child before key().
        if self.direction != Direction::Reverse {
            let key = self.children[current].key.clone();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                self.children[i].seek(&key);
                if self.children[i].valid {
                    // Child sits at the first entry >= key(); step back.
                    self.children[i].prev();
                } else {
                    // No entries >= key(): the child's last entry, if
                    // any, is before it.
                    self.children[i].seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.children[self.current.unwrap()].key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.children[self.current.unwrap()].iter.value()
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.iter.status()?;
        }
        Ok(())
    }
}

/// Index iterator over the files of one disjoint level: keys are each
/// file's largest internal key, values encode `(number, size)` for the
/// table cache. Drives the concatenating two-level iterator.
pub(crate) struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    index: usize,
    value_buf: Vec<u8>,
}

impl LevelFileNumIterator {
    pub(crate) fn new(
        icmp: InternalKeyComparator,
        files: Vec<Arc<FileMetaData>>,
    ) -> LevelFileNumIterator {
        let index = files.len();
        LevelFileNumIterator {
            icmp,
            files,
            index,
            value_buf: Vec::with_capacity(16),
        }
    }

    fn refresh_value(&mut self) {
        if self.valid() {
            let f = &self.files[self.index];
            self.value_buf.clear();
            put_fixed64(&mut self.value_buf, f.number);
            put_fixed64(&mut self.value_buf, f.file_size);
        }
    }
}

impl InternalIterator for LevelFileNumIterator {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.refresh_value();
    }

    fn seek_to_last(&mut self) {
        self.index = if self.files.is_empty() {
            0
        } else {
            self.files.len() - 1
        };
        self.refresh_value();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = crate::version::find_file(&self.icmp, &self.files, target);
        self.refresh_value();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.index += 1;
        self.refresh_value();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if self.index == 0 {
            self.index = self.files.len();
        } else {
            self.index -= 1;
            self.refresh_value();
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.files[self.index].largest.encoded()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

/// The public iterator: walks a merged internal-key stream and yields
/// each live user key exactly once, at the newest version visible at the
/// captured sequence number.
///
/// Going forward the cursor rests *on* the entry being exposed; going
/// backward it rests on the entry *before* the exposed one, whose
/// key/value are saved in the iterator. Direction switches re-orient the
/// underlying stream accordingly.
pub struct DbIterator {
    iter: MergingIterator,
    ucmp: Arc<dyn Comparator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    /// Current user key when reversed (and scratch while skipping).
    saved_key: Vec<u8>,
    /// Current value when reversed.
    saved_value: Vec<u8>,
}

impl DbIterator {
    pub(crate) fn new(
        iter: MergingIterator,
        ucmp: Arc<dyn Comparator>,
        sequence: SequenceNumber,
    ) -> DbIterator {
        DbIterator {
            iter,
            ucmp,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Key under the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `!self.valid()`.
    pub fn key(&self) -> &[u8] {
        assert!(self.valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Value under the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `!self.valid()`.
    pub fn value(&self) -> &[u8] {
        assert!(self.valid);
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    pub fn status(&self) -> Result<()> {
        self.iter.status()
    }

    pub fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        let lookup = LookupKey::new(target, self.sequence);
        self.iter.seek(lookup.internal_key());
        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.iter.seek_to_first();
        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.iter.seek_to_last();
        self.find_prev_user_entry();
    }

    pub fn next(&mut self) {
        assert!(self.valid);

        if self.direction == Direction::Reverse {
            // The cursor sits before the exposed entry (or is exhausted);
            // move it back onto the first entry of the exposed user key
            // so the skip below lands on the next one.
            self.direction = Direction::Forward;
            if !self.iter.valid() {
                self.iter.seek_to_first();
            } else {
                self.iter.next();
            }
            if !self.iter.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
            // saved_key still holds the user key just exposed.
        } else {
            self.save_current_key();
        }

        self.find_next_user_entry(true);
    }

    pub fn prev(&mut self) {
        assert!(self.valid);

        if self.direction == Direction::Forward {
            // The cursor sits on the exposed entry; walk back to the
            // first entry before its user key.
            self.save_current_key();
            loop {
                self.iter.prev();
                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                if self
                    .ucmp
                    .compare(extract_user_key(self.iter.key()), &self.saved_key)
                    == CmpOrdering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
    }

    /// Forward scan to the newest visible, undeleted entry of the next
    /// acceptable user key. With `skipping`, entries for `saved_key`
    /// (and anything smaller) are passed over.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert_eq!(self.direction, Direction::Forward);
        while self.iter.valid() {
            if let Some(parsed) = parse_internal_key(self.iter.key()) {
                if parsed.sequence <= self.sequence {
                    match parsed.value_type {
                        ValueType::Deletion => {
                            // Everything older with this user key is
                            // shadowed.
                            self.saved_key.clear();
                            self.saved_key.extend_from_slice(parsed.user_key);
                            skipping = true;
                        }
                        ValueType::Value => {
                            if skipping
                                && self.ucmp.compare(parsed.user_key, &self.saved_key)
                                    != CmpOrdering::Greater
                            {
                                // Shadowed by a newer entry already seen.
                            } else {
                                self.valid = true;
                                self.saved_key.clear();
                                return;
                            }
                        }
                    }
                }
            }
            self.iter.next();
        }
        self.saved_key.clear();
        self.valid = false;
    }

    /// Backward scan: accumulates the newest visible entry of the
    /// current user key into `saved_*`, stopping once the cursor has
    /// moved onto a smaller user key.
    fn find_prev_user_entry(&mut self) {
        debug_assert_eq!(self.direction, Direction::Reverse);

        let mut value_type = ValueType::Deletion;
        while self.iter.valid() {
            if let Some(parsed) = parse_internal_key(self.iter.key()) {
                if parsed.sequence <= self.sequence {
                    if value_type != ValueType::Deletion
                        && self.ucmp.compare(parsed.user_key, &self.saved_key)
                            == CmpOrdering::Less
                    {
                        // The saved entry is the winner for its user key;
                        // the cursor now rests before it, as reverse
                        // orientation requires.
                        break;
                    }
                    value_type = parsed.value_type;
                    if value_type == ValueType::Deletion {
                        self.saved_key.clear();
                        self.saved_value.clear();
                    } else {
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(parsed.user_key);
                        self.saved_value.clear();
                        self.saved_value.extend_from_slice(self.iter.value());
                    }
                }
            }
            self.iter.prev();
        }

        if value_type == ValueType::Deletion {
            // Ran off the front of the stream.
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }

    fn save_current_key(&mut self) {
        self.saved_key.clear();
        self.saved_key
            .extend_from_slice(extract_user_key(self.iter.key()));
    }
}
