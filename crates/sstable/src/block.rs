//! Prefix-compressed sorted block: the unit shared by data, index and
//! metaindex sections of a table.
//!
//! Entries share key prefixes with their predecessor:
//!
//! ```text
//! varint32(shared) || varint32(non_shared) || varint32(value_len)
//! || key_delta[non_shared] || value[value_len]
//! ```
//!
//! Every `restart_interval` entries a *restart point* is emitted with
//! `shared = 0`; the block tail lists the restart offsets so seeks can
//! binary-search restarts and scan at most one interval linearly:
//!
//! ```text
//! ... entries ... || u32_le(restart[0]) .. u32_le(restart[n-1]) || u32_le(n)
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

use codec::{decode_fixed32, put_fixed32, put_varint32};
use types::{Comparator, Error, InternalIterator, Result};

/// Builds the wire form of one block.
pub struct BlockBuilder {
    restart_interval: usize,
    cmp: Arc<dyn Comparator>,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries since the last restart point.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize, cmp: Arc<dyn Comparator>) -> Self {
        assert!(restart_interval >= 1);
        Self {
            restart_interval,
            cmp,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry. Keys must arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.restart_interval);
        debug_assert!(
            self.buffer.is_empty() || self.cmp.compare(key, &self.last_key) == CmpOrdering::Greater,
            "keys added out of order"
        );

        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the finished contents.
    pub fn finish(&mut self) -> &[u8] {
        for i in 0..self.restarts.len() {
            let r = self.restarts[i];
            put_fixed32(&mut self.buffer, r);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Size of the block if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A decoded, immutable block. Shared via `Arc` so the block cache and
/// live iterators can hold it concurrently.
pub struct Block {
    data: Vec<u8>,
    /// Offset of the restart array.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Validates the restart framing and takes ownership of the bytes.
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too small".into()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts as usize > max_restarts {
            return Err(Error::Corruption("bad restart count in block".into()));
        }
        let restart_offset = data.len() - 4 - num_restarts as usize * 4;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + index as usize * 4..]) as usize
    }
}

/// Cursor over one block's entries.
///
/// `current` is the byte offset of the current entry; `restart_offset`
/// doubles as the "invalid" position. The decoded key lives in a scratch
/// buffer (prefix compression means it is not contiguous in the block);
/// the value is referenced by offset into the block data.
pub struct BlockIter {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    current: usize,
    restart_index: u32,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Option<Error>,
}

impl BlockIter {
    pub fn new(block: Arc<Block>, cmp: Arc<dyn Comparator>) -> Self {
        let current = block.restart_offset;
        let restart_index = block.num_restarts;
        Self {
            block,
            cmp,
            current,
            restart_index,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: None,
        }
    }

    /// Offset just past the current entry.
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn mark_corrupt(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value_offset = 0;
        self.value_len = 0;
        if self.status.is_none() {
            self.status = Some(Error::Corruption("bad entry in block".into()));
        }
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // Position "before" the restart entry; parse_next_entry reads it.
        let offset = self.block.restart_point(index);
        self.value_offset = offset;
        self.value_len = 0;
    }

    /// Decodes the entry at `next_entry_offset`, false at block end or on
    /// corruption.
    fn parse_next_entry(&mut self) -> bool {
        self.current = self.next_entry_offset();
        let limit = self.block.restart_offset;
        if self.current >= limit {
            self.current = limit;
            self.restart_index = self.block.num_restarts;
            return false;
        }

        let header = {
            let mut cursor = &self.block.data[self.current..limit];
            let before = cursor.len();
            let shared = codec::get_varint32(&mut cursor);
            let non_shared = codec::get_varint32(&mut cursor);
            let value_len = codec::get_varint32(&mut cursor);
            match (shared, non_shared, value_len) {
                (Ok(s), Ok(n), Ok(v)) => Some((s, n, v, before - cursor.len())),
                _ => None,
            }
        };
        let (shared, non_shared, value_len, header_len) = match header {
            Some(h) => h,
            None => {
                self.mark_corrupt();
                return false;
            }
        };

        let delta_offset = self.current + header_len;
        let payload = (non_shared as usize) + (value_len as usize);
        if limit - delta_offset < payload || self.key.len() < shared as usize {
            self.mark_corrupt();
            return false;
        }

        self.key.truncate(shared as usize);
        self.key
            .extend_from_slice(&self.block.data[delta_offset..delta_offset + non_shared as usize]);
        self.value_offset = delta_offset + non_shared as usize;
        self.value_len = value_len as usize;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// Key at a restart point, where `shared` must be zero.
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data[..self.block.restart_offset];
        let mut cursor = &data[offset..];
        let shared = codec::get_varint32(&mut cursor).ok()?;
        let non_shared = codec::get_varint32(&mut cursor).ok()?;
        let _value_len = codec::get_varint32(&mut cursor).ok()?;
        if shared != 0 || cursor.len() < non_shared as usize {
            return None;
        }
        let delta_offset = data.len() - cursor.len();
        Some(&data[delta_offset..delta_offset + non_shared as usize])
    }
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        // Walk forward to the final entry of the block.
        while self.parse_next_entry() && self.next_entry_offset() < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            return;
        }
        // Binary search over restart points for the last restart whose
        // key is < target.
        let mut left: u32 = 0;
        let mut right: u32 = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.restart_key(mid) {
                Some(mid_key) => {
                    if self.cmp.compare(mid_key, target) == CmpOrdering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                None => {
                    self.mark_corrupt();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_entry() {
                return;
            }
            if self.cmp.compare(&self.key, target) != CmpOrdering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;

        // Back up to the restart point strictly before the current
        // entry, then scan forward to the entry preceding it.
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts;
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_entry() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
