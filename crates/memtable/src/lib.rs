//! # Memtable — sorted in-memory write buffer
//!
//! A memtable absorbs recent writes as encoded internal-key entries in an
//! append-only [`Arena`], ordered by a lock-free-read skip list. Readers
//! (point lookups and iterators, possibly on many threads) take no locks;
//! the single writer is serialised externally by the DB mutex.
//!
//! ## Entry encoding
//!
//! ```text
//! varint32(user_key_len + 8) || user_key || u64_le(seq << 8 | type)
//! || varint32(value_len) || value
//! ```
//!
//! The skip list keys are raw pointers to these buffers; the arena keeps
//! every entry alive (and at a stable address) until the memtable itself
//! is dropped, which happens only after the last reader releases its
//! `Arc`.

mod arena;
mod skiplist;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use codec::varint_length;
use types::{
    pack_sequence_and_type, Comparator, InternalIterator, InternalKeyComparator, LookupKey,
    Result, SequenceNumber, ValueType,
};

pub use arena::Arena;
use skiplist::{Node, SkipList};

/// Outcome of a memtable point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The newest visible entry for the key is a value.
    Found(Vec<u8>),
    /// The newest visible entry for the key is a tombstone; deeper
    /// layers must not be consulted.
    Deleted,
}

/// Sorted in-memory map from internal keys to values.
pub struct MemTable {
    icmp: InternalKeyComparator,
    list: SkipList,
    arena: Arena,
    /// Entry bytes plus an estimate of skip-list node overhead.
    usage: AtomicUsize,
}

impl MemTable {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self {
            icmp: icmp.clone(),
            list: SkipList::new(icmp),
            arena: Arena::new(),
            usage: AtomicUsize::new(0),
        }
    }

    /// Inserts an entry. Entries are never overwritten; a newer write of
    /// the same user key gets a higher sequence number and sorts first.
    ///
    /// Callers must serialise `add` externally; `get` and iterators may
    /// run concurrently with it.
    pub fn add(&self, seq: SequenceNumber, t: ValueType, user_key: &[u8], value: &[u8]) {
        let ikey_len = user_key.len() + 8;
        let encoded_len =
            varint_length(ikey_len as u64) + ikey_len + varint_length(value.len() as u64) + value.len();

        let ptr = self.arena.allocate(encoded_len);
        unsafe {
            let buf = std::slice::from_raw_parts_mut(ptr.as_ptr(), encoded_len);
            let mut pos = write_varint32(buf, 0, ikey_len as u32);
            buf[pos..pos + user_key.len()].copy_from_slice(user_key);
            pos += user_key.len();
            buf[pos..pos + 8].copy_from_slice(&pack_sequence_and_type(seq, t).to_le_bytes());
            pos += 8;
            pos = write_varint32(buf, pos, value.len() as u32);
            buf[pos..pos + value.len()].copy_from_slice(value);
            debug_assert_eq!(pos + value.len(), encoded_len);

            self.list.insert(ptr.as_ptr());
        }
        // Rough per-node overhead: an average tower is under two levels.
        self.usage
            .fetch_add(encoded_len + 4 * std::mem::size_of::<usize>(), Ordering::Relaxed);
    }

    /// Looks up the newest entry for the key visible at the lookup
    /// sequence. `None` means this memtable has nothing to say and
    /// deeper layers decide.
    pub fn get(&self, key: &LookupKey) -> Option<LookupResult> {
        let node = self.list.seek(key.memtable_key().as_ptr());
        if node.is_null() {
            return None;
        }
        unsafe {
            let entry = self.list.entry(node);
            let ikey = entry_internal_key(entry);
            // The seek landed at the first entry >= the lookup key; it
            // only answers for our user key if the user keys match.
            let user_key = &ikey[..ikey.len() - 8];
            if self
                .icmp
                .user_comparator()
                .compare(user_key, key.user_key())
                != std::cmp::Ordering::Equal
            {
                return None;
            }
            let tag = codec::decode_fixed64(&ikey[ikey.len() - 8..]);
            match ValueType::from_u8((tag & 0xff) as u8) {
                Some(ValueType::Value) => Some(LookupResult::Found(entry_value(entry).to_vec())),
                Some(ValueType::Deletion) => Some(LookupResult::Deleted),
                // Unreachable for entries this memtable encoded.
                None => None,
            }
        }
    }

    /// Bytes consumed by entries and nodes, eventually consistent. The
    /// DB polls this to decide when to rotate the memtable.
    pub fn approximate_memory_usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed).max(self.arena.memory_usage())
    }
}

/// Iterator yielding `(internal_key, value)` pairs in order. Holds an
/// `Arc` on the memtable, keeping its entries alive and stable.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    node: *const Node,
    /// Scratch for converting a raw internal key into the
    /// length-prefixed form the skip list compares with.
    seek_buf: Vec<u8>,
}

impl MemTableIterator {
    pub fn new(mem: Arc<MemTable>) -> MemTableIterator {
        MemTableIterator {
            mem,
            node: std::ptr::null(),
            seek_buf: Vec::new(),
        }
    }
}

// The raw cursor points into arena memory owned (transitively) by the
// `Arc<MemTable>` this iterator holds.
unsafe impl Send for MemTableIterator {}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        !self.node.is_null()
    }

    fn seek_to_first(&mut self) {
        self.node = self.mem.list.first();
    }

    fn seek_to_last(&mut self) {
        self.node = self.mem.list.last();
    }

    fn seek(&mut self, target: &[u8]) {
        self.seek_buf.clear();
        codec::put_varint32(&mut self.seek_buf, target.len() as u32);
        self.seek_buf.extend_from_slice(target);
        self.node = self.mem.list.seek(self.seek_buf.as_ptr());
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = self.mem.list.next_node(self.node);
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        self.node = self.mem.list.prev_node(self.node);
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        unsafe { entry_internal_key(self.mem.list.entry(self.node)) }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        unsafe { entry_value(self.mem.list.entry(self.node)) }
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry decoding
// ---------------------------------------------------------------------------

/// Reads a varint32 byte-by-byte from a raw pointer, never touching a
/// byte past the varint itself.
unsafe fn read_varint32_raw(mut p: *const u8) -> (u32, *const u8) {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *p;
        p = p.add(1);
        result |= ((byte & 0x7f) as u32) << shift;
        if byte < 0x80 {
            return (result, p);
        }
        shift += 7;
    }
}

/// The internal key of an encoded entry (or of a length-prefixed seek
/// key, which shares the prefix layout).
///
/// # Safety
///
/// `entry` must point at a well-formed encoded entry that outlives the
/// returned slice.
pub(crate) unsafe fn entry_internal_key<'a>(entry: *const u8) -> &'a [u8] {
    let (len, data) = read_varint32_raw(entry);
    std::slice::from_raw_parts(data, len as usize)
}

/// The value of an encoded entry.
///
/// # Safety
///
/// As [`entry_internal_key`]; additionally the entry must carry a value
/// section (every arena entry does, seek keys do not).
unsafe fn entry_value<'a>(entry: *const u8) -> &'a [u8] {
    let key = entry_internal_key(entry);
    let (len, data) = read_varint32_raw(key.as_ptr().add(key.len()));
    std::slice::from_raw_parts(data, len as usize)
}

/// Writes a varint32 into `buf` at `pos`, returning the new position.
fn write_varint32(buf: &mut [u8], mut pos: usize, mut value: u32) -> usize {
    while value >= 0x80 {
        buf[pos] = (value as u8) | 0x80;
        value >>= 7;
        pos += 1;
    }
    buf[pos] = value as u8;
    pos + 1
}

/// Builds a standalone encoded entry; test helper for the skip list.
#[cfg(test)]
pub(crate) fn encode_entry(
    user_key: &[u8],
    seq: SequenceNumber,
    t: ValueType,
    value: &[u8],
) -> Vec<u8> {
    let ikey_len = user_key.len() + 8;
    let mut buf = Vec::new();
    codec::put_varint32(&mut buf, ikey_len as u32);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_sequence_and_type(seq, t).to_le_bytes());
    codec::put_varint32(&mut buf, value.len() as u32);
    buf.extend_from_slice(value);
    buf
}

#[cfg(test)]
mod tests;
