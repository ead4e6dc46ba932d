//! Probabilistic skip list over arena-allocated memtable entries.
//!
//! Thread safety: writes require external mutual exclusion, reads
//! require none. A node's forward pointers are
//! atomics; linking a new node release-stores each pointer after the
//! node's own tower is fully initialised, and traversal acquire-loads
//! them, so a reader either misses the new node entirely or sees it whole.
//! Nodes are never unlinked or freed while the list is alive.
//!
//! Keys are raw pointers to immutable encoded entries
//! (`varint32(ikey_len) || internal_key || varint32(vlen) || value`)
//! owned by the memtable's arena.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::cmp::Ordering as CmpOrdering;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use types::{Comparator, InternalKeyComparator};

use crate::entry_internal_key;

pub(crate) const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

#[repr(C)]
pub(crate) struct Node {
    entry: *const u8,
    height: usize,
    /// First slot of a `height`-long tower; the rest are allocated
    /// immediately after this struct.
    tower: [AtomicPtr<Node>; 1],
}

impl Node {
    fn layout(height: usize) -> Layout {
        debug_assert!((1..=MAX_HEIGHT).contains(&height));
        let size = std::mem::size_of::<Node>()
            + (height - 1) * std::mem::size_of::<AtomicPtr<Node>>();
        Layout::from_size_align(size, std::mem::align_of::<Node>()).unwrap()
    }

    /// Allocates a node with a zeroed tower of `height` pointers.
    unsafe fn alloc(entry: *const u8, height: usize) -> *mut Node {
        let node = alloc(Node::layout(height)) as *mut Node;
        assert!(!node.is_null(), "memtable node allocation failed");
        ptr::addr_of_mut!((*node).entry).write(entry);
        ptr::addr_of_mut!((*node).height).write(height);
        let tower = ptr::addr_of_mut!((*node).tower) as *mut AtomicPtr<Node>;
        for i in 0..height {
            tower.add(i).write(AtomicPtr::new(ptr::null_mut()));
        }
        node
    }

    unsafe fn slot(&self, n: usize) -> &AtomicPtr<Node> {
        debug_assert!(n < self.height);
        let tower = ptr::addr_of!(self.tower) as *const AtomicPtr<Node>;
        &*tower.add(n)
    }

    unsafe fn next(&self, n: usize) -> *mut Node {
        self.slot(n).load(Ordering::Acquire)
    }

    unsafe fn set_next(&self, n: usize, node: *mut Node) {
        self.slot(n).store(node, Ordering::Release);
    }

    unsafe fn next_relaxed(&self, n: usize) -> *mut Node {
        self.slot(n).load(Ordering::Relaxed)
    }

    unsafe fn set_next_relaxed(&self, n: usize, node: *mut Node) {
        self.slot(n).store(node, Ordering::Relaxed);
    }
}

pub(crate) struct SkipList {
    head: *mut Node,
    /// Tallest tower in use. Relaxed is enough: a reader that sees a
    /// stale (smaller) height just skips the new levels; one that sees
    /// the new height before the links finds null pointers at the new
    /// levels of `head` and falls through to lower levels correctly.
    max_height: AtomicUsize,
    icmp: InternalKeyComparator,
    /// Writer-only LCG state for tower heights; guarded by the same
    /// external mutex that serialises `insert`.
    rnd: Cell<u32>,
}

// Raw pointers keep the auto-traits away; the synchronisation story is
// the release/acquire protocol above plus the external writer mutex.
unsafe impl Send for SkipList {}
unsafe impl Sync for SkipList {}

impl SkipList {
    pub(crate) fn new(icmp: InternalKeyComparator) -> Self {
        let head = unsafe { Node::alloc(ptr::null(), MAX_HEIGHT) };
        Self {
            head,
            max_height: AtomicUsize::new(1),
            icmp,
            rnd: Cell::new(0xdeadbeef),
        }
    }

    fn max_height(&self) -> usize {
        self.max_height.load(Ordering::Relaxed)
    }

    fn random_height(&self) -> usize {
        let mut height = 1;
        loop {
            let next = self
                .rnd
                .get()
                .wrapping_mul(1103515245)
                .wrapping_add(12345)
                & 0x7fff_ffff;
            self.rnd.set(next);
            if height >= MAX_HEIGHT || next % BRANCHING != 0 {
                break;
            }
            height += 1;
        }
        height
    }

    /// Compares the entries at two keys (either arena entries or a
    /// caller-provided seek key in the same length-prefixed encoding).
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> CmpOrdering {
        self.icmp
            .compare(entry_internal_key(a), entry_internal_key(b))
    }

    unsafe fn key_is_after_node(&self, key: *const u8, node: *mut Node) -> bool {
        !node.is_null() && self.compare((*node).entry, key) == CmpOrdering::Less
    }

    /// Earliest node whose key is >= `key`; fills `prev` with the
    /// predecessor at every level when provided.
    unsafe fn find_greater_or_equal(
        &self,
        key: *const u8,
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut x = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = (*x).next(level);
            if self.key_is_after_node(key, next) {
                x = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Latest node whose key is < `key`, or `head` if none.
    unsafe fn find_less_than(&self, key: *const u8) -> *mut Node {
        let mut x = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = (*x).next(level);
            if next.is_null() || self.compare((*next).entry, key) != CmpOrdering::Less {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// Last node in the list, or `head` if empty.
    unsafe fn find_last(&self) -> *mut Node {
        let mut x = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = (*x).next(level);
            if next.is_null() {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// Links `entry` into the list.
    ///
    /// Callers must serialise inserts externally (the DB mutex) and must
    /// never insert a key that compares equal to one already present;
    /// the `(user_key, sequence, type)` triple is unique by construction.
    pub(crate) fn insert(&self, entry: *const u8) {
        unsafe {
            let mut prev = [ptr::null_mut(); MAX_HEIGHT];
            let x = self.find_greater_or_equal(entry, Some(&mut prev));
            debug_assert!(
                x.is_null() || self.compare((*x).entry, entry) != CmpOrdering::Equal,
                "duplicate internal key inserted into memtable"
            );

            let height = self.random_height();
            if height > self.max_height() {
                for slot in prev.iter_mut().take(height).skip(self.max_height()) {
                    *slot = self.head;
                }
                self.max_height.store(height, Ordering::Relaxed);
            }

            let node = Node::alloc(entry, height);
            for i in 0..height {
                // Build the node's own link without a barrier, then
                // publish it with a release store; the release makes the
                // fully-initialised node visible to acquire readers.
                (*node).set_next_relaxed(i, (*prev[i]).next_relaxed(i));
                (*prev[i]).set_next(i, node);
            }
        }
    }

    // -- cursor operations used by the memtable iterator ----------------
    //
    // Cursors are raw node pointers; null means "not positioned". The
    // caller keeps the memtable (and with it this list) alive.

    pub(crate) fn first(&self) -> *const Node {
        unsafe { (*self.head).next(0) }
    }

    pub(crate) fn last(&self) -> *const Node {
        unsafe {
            let n = self.find_last();
            if n == self.head {
                ptr::null()
            } else {
                n
            }
        }
    }

    /// First node with key >= `key` (a length-prefixed seek key).
    pub(crate) fn seek(&self, key: *const u8) -> *const Node {
        unsafe { self.find_greater_or_equal(key, None) }
    }

    pub(crate) fn next_node(&self, node: *const Node) -> *const Node {
        unsafe { (*node).next(0) }
    }

    pub(crate) fn prev_node(&self, node: *const Node) -> *const Node {
        unsafe {
            let n = self.find_less_than((*node).entry);
            if n == self.head {
                ptr::null()
            } else {
                n
            }
        }
    }

    /// The encoded entry a cursor points at.
    ///
    /// # Safety
    ///
    /// `node` must be a non-null cursor obtained from this list.
    pub(crate) unsafe fn entry(&self, node: *const Node) -> *const u8 {
        (*node).entry
    }
}

impl Drop for SkipList {
    fn drop(&mut self) {
        // Level 0 links every node; entries themselves belong to the
        // arena and are not freed here.
        unsafe {
            let mut node = self.head;
            while !node.is_null() {
                let next = (*node).next_relaxed(0);
                dealloc(node as *mut u8, Node::layout((*node).height));
                node = next;
            }
        }
    }
}
