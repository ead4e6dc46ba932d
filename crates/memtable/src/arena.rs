use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

const BLOCK_SIZE: usize = 4096;

/// Append-only bump allocator backing one memtable.
///
/// Allocations are carved out of fixed-size blocks; requests larger than
/// a quarter block get a block of their own so the common blocks stay
/// densely packed. Nothing is ever freed individually; the whole arena
/// is released when the memtable drops, which is also what makes the
/// returned pointers stable: blocks are boxed slices that never move.
///
/// Allocation takes an internal lock, but only the single (externally
/// serialised) writer allocates; readers touch allocated bytes only.
pub struct Arena {
    core: Mutex<Core>,
    usage: AtomicUsize,
}

struct Core {
    /// Bump cursor into the last block.
    ptr: *mut u8,
    remaining: usize,
    blocks: Vec<Box<[u8]>>,
}

// The raw cursor is only reachable through the Mutex.
unsafe impl Send for Core {}

impl Arena {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(Core {
                ptr: std::ptr::null_mut(),
                remaining: 0,
                blocks: Vec::new(),
            }),
            usage: AtomicUsize::new(0),
        }
    }

    /// Returns a stable pointer to `size` fresh bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        assert!(size > 0);
        let mut core = self.core.lock();
        if size > core.remaining {
            let block_size = if size > BLOCK_SIZE / 4 {
                // Oversized request: dedicated block, current block keeps
                // its remaining space for future small allocations.
                size
            } else {
                BLOCK_SIZE
            };
            let block = vec![0u8; block_size].into_boxed_slice();
            core.blocks.push(block);
            let last = core.blocks.last_mut().unwrap();
            if block_size == BLOCK_SIZE {
                core.ptr = last.as_mut_ptr();
                core.remaining = BLOCK_SIZE;
            } else {
                // Serve the oversized request directly.
                let ptr = last.as_mut_ptr();
                self.usage.fetch_add(block_size, Ordering::Relaxed);
                return NonNull::new(ptr).unwrap();
            }
        }
        let ptr = core.ptr;
        unsafe {
            core.ptr = core.ptr.add(size);
        }
        core.remaining -= size;
        self.usage.fetch_add(size, Ordering::Relaxed);
        NonNull::new(ptr).unwrap()
    }

    /// Bytes handed out so far. Eventually consistent; used only to
    /// decide when to rotate the memtable.
    pub fn memory_usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_remain_valid_across_block_growth() {
        let arena = Arena::new();
        let mut slots = Vec::new();
        for i in 0..1000u32 {
            let p = arena.allocate(16);
            unsafe {
                std::ptr::write_bytes(p.as_ptr(), (i % 251) as u8, 16);
            }
            slots.push((p, (i % 251) as u8));
        }
        for (p, fill) in slots {
            let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 16) };
            assert!(bytes.iter().all(|&b| b == fill));
        }
    }

    #[test]
    fn oversized_allocations_get_their_own_block() {
        let arena = Arena::new();
        let a = arena.allocate(8);
        let big = arena.allocate(BLOCK_SIZE * 2);
        let b = arena.allocate(8);
        unsafe {
            std::ptr::write_bytes(big.as_ptr(), 0xee, BLOCK_SIZE * 2);
        }
        // The small allocations stay adjacent in the original block.
        assert_eq!(unsafe { a.as_ptr().add(8) }, b.as_ptr());
    }

    #[test]
    fn usage_grows_monotonically() {
        let arena = Arena::new();
        assert_eq!(arena.memory_usage(), 0);
        arena.allocate(100);
        let after_first = arena.memory_usage();
        assert!(after_first >= 100);
        arena.allocate(5000);
        assert!(arena.memory_usage() >= after_first + 5000);
    }
}
