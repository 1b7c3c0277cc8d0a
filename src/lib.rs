//! A binned free-list memory allocator that manages the program break.
//!
//! The heap is a single contiguous region below a break address. It is carved
//! into blocks, each a small header followed by the payload handed to the
//! caller. Every block sits on a doubly linked *physical list* ordered by
//! address, and every free block additionally sits in one of 64 *bins*, free
//! lists segregated by payload size. Small requests are served from an
//! exactly-sized bin, larger ones first fit from the overflow bin, and only
//! when no binned block fits is the break pushed forward. Releasing a block
//! merges it with free neighbors, and releasing the topmost block lowers the
//! break again.
//!
//! ```no_run
//! use balloc::{Allocator, OsBreak};
//!
//! let mut allocator = Allocator::new(OsBreak);
//!
//! unsafe {
//!     let ptr = allocator.alloc(100);
//!     assert!(!ptr.is_null());
//!     allocator.dealloc(ptr);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

mod bins;
mod blocks;
mod brk;
mod divisible_by_8_usize;

#[cfg(test)]
mod tests;

use core::ptr::NonNull;

use static_assertions::const_assert;

use bins::*;
use blocks::*;

pub use bins::{BIGGEST_BINNED_SIZE, BIN_COUNT};
pub use brk::HeapBreak;
#[cfg(all(feature = "os", unix))]
pub use brk::OsBreak;

/// The smallest payload handed out. Requests below this are rounded up to it.
pub const MINIMUM_ALLOCATION: usize = 16;

/// The granularity of binned sizes. Every payload size is a multiple of this,
/// and payloads are aligned to it.
pub const SIZE_MULTIPLE: usize = 8;

/// How many bytes the header of a used block occupies.
///
/// This is the offset of the first free-only field of [`FreeBlock`], not
/// `size_of::<FreeBlock>()`: the free-list links overlay the start of the
/// payload, so a used block pays only for the always-valid region.
pub const HEADER_SIZE: usize = core::mem::offset_of!(FreeBlock, prev_free);

/// The smallest number of bytes a block (header plus payload) can occupy.
pub const MINIMUM_BLOCK_SIZE: usize = MINIMUM_ALLOCATION + HEADER_SIZE;

/// How many bytes a block holding a payload of the given size occupies.
pub const fn block_size(payload_size: usize) -> usize {
    HEADER_SIZE + payload_size
}

// the always-valid region must be exactly the used-block header, the header
// arithmetic must preserve the size quantum, and the free-list links must fit
// in the smallest payload.
const_assert!(HEADER_SIZE == core::mem::size_of::<Block>());
const_assert!(HEADER_SIZE % SIZE_MULTIPLE == 0);
const_assert!(MINIMUM_ALLOCATION % SIZE_MULTIPLE == 0);
const_assert!(MINIMUM_ALLOCATION >= core::mem::size_of::<FreeBlock>() - HEADER_SIZE);

/// A binned free-list allocator over a heap break.
///
/// All allocator state lives in this object, so independent instances over
/// disjoint break sources can coexist.
pub struct Allocator<B: HeapBreak> {
    brk: B,
    bins: Bins,

    /// The block at the highest address, or `None` while the heap holds no
    /// blocks. Walking backwards from here visits every block.
    heap_tail: Option<BlockPtr>,
}

impl<B: HeapBreak> Allocator<B> {
    /// Creates an allocator with no blocks, drawing memory from the given
    /// heap break on demand.
    pub const fn new(brk: B) -> Self {
        Self {
            brk,
            bins: Bins::new(),
            heap_tail: None,
        }
    }

    /// A mutable handle to the underlying heap-break source.
    pub fn break_source(&mut self) -> &mut B {
        &mut self.brk
    }

    /// Allocates memory.
    ///
    /// Returns a pointer to at least `size` writable bytes, aligned to
    /// [`SIZE_MULTIPLE`], or null when `size` is zero or the heap break
    /// cannot be grown.
    ///
    /// # Safety
    ///
    /// The allocator must be the only user of its break source's memory.
    pub unsafe fn alloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return core::ptr::null_mut();
        }

        let size = round_up_size(size);
        let bin_index = size_to_bin(size);

        if bin_index < OVERFLOW_BIN {
            // exact fit: all blocks in a small bin share one rounded size,
            // so the head is as good as any
            if let Some(mut head) = self.bins.head(bin_index) {
                debug_assert_eq!(head.as_ref().size(), size);

                self.bins.remove(head.as_mut());
                let mut block = head.cast::<Block>();
                block.as_mut().set_in_use(true);
                return block.as_ref().content_addr() as *mut u8;
            }

            // no exact fit, carve the request out of the first non-empty
            // larger small bin
            for index in bin_index + 1..OVERFLOW_BIN {
                if let Some(mut head) = self.bins.head(index) {
                    self.bins.remove(head.as_mut());
                    return self.use_whole_or_split(head.cast(), size);
                }
            }
        }

        // first fit in the overflow bin
        let mut current = self.bins.head(OVERFLOW_BIN);
        while let Some(mut free) = current {
            if free.as_ref().size() >= size {
                self.bins.remove(free.as_mut());
                return self.use_whole_or_split(free.cast(), size);
            }
            current = free.as_ref().next_free;
        }

        // no binned block fits, push the break forward by one block
        let Some(old_break) = self.brk.grow(block_size(size)) else {
            return core::ptr::null_mut();
        };
        let block = Block::create(old_break, size, true, None, None);
        self.append_tail(block);
        block.as_ref().content_addr() as *mut u8
    }

    /// Deallocates memory.
    ///
    /// Null is a no-op.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be a pointer previously returned by
    /// [`alloc`](Allocator::alloc) on this allocator and not yet
    /// deallocated.
    pub unsafe fn dealloc(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let block_to_free = UsedBlock::from_addr(ptr as usize - HEADER_SIZE);
        let mut merged = self.coalesce(NonNull::from(&mut block_to_free.0));
        merged.as_mut().set_in_use(false);

        if merged.as_ref().next_phys.is_none() {
            // the merged block reaches the break, hand it back to the host
            self.pop_tail();
            self.brk.shrink_to(merged.as_ref().addr());
        } else {
            self.bins.insert(FreeBlock::from_addr(merged.as_ptr() as usize));
        }
    }

    /// Services a rounded request of `size` bytes from a free block that has
    /// already been removed from its bin: splits when the remainder is at
    /// least a whole minimum block, hands the block over in full otherwise.
    unsafe fn use_whole_or_split(&mut self, mut block: BlockPtr, size: usize) -> *mut u8 {
        debug_assert!(block.as_ref().size() >= size);

        let used = if block.as_ref().size() - size >= MINIMUM_BLOCK_SIZE {
            self.split(block, size)
        } else {
            block.as_mut().set_in_use(true);
            block
        };
        used.as_ref().content_addr() as *mut u8
    }

    /// Carves a used block of exactly `want` payload bytes out of the front
    /// of the given free block, which must already be removed from its bin,
    /// and bins the remainder as a new free block.
    ///
    /// The remainder must amount to at least [`MINIMUM_BLOCK_SIZE`] bytes.
    unsafe fn split(&mut self, mut block: BlockPtr, want: usize) -> BlockPtr {
        let block_ref = block.as_mut();
        let old_size = block_ref.size();
        let old_next = block_ref.next_phys;

        let residual = Block::create(
            block_ref.addr() + HEADER_SIZE + want,
            old_size - want - HEADER_SIZE,
            false,
            Some(block),
            old_next,
        );

        block_ref.set_size(want);
        block_ref.set_in_use(true);
        block_ref.next_phys = Some(residual);

        match old_next {
            Some(mut next) => next.as_mut().prev_phys = Some(residual),
            None => self.heap_tail = Some(residual),
        }

        self.bins.insert(FreeBlock::from_addr(residual.as_ptr() as usize));

        block
    }

    /// Merges the given block, which must not be in any bin, with whichever
    /// of its physical neighbors are free. Returns the merged block; its
    /// free-list links are undefined until it is inserted into a bin.
    unsafe fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        let (prev_free, next_free) = {
            let block = block.as_ref();
            (block.prev_phys_if_free(), block.next_phys_if_free())
        };

        match (prev_free, next_free) {
            // both neighbors in use or absent, nothing to merge
            (None, None) => block,

            // the merged block spans all three neighbors and starts where
            // the previous one did
            (Some(mut prev), Some(mut next)) => {
                self.bins.remove(prev.as_mut());
                self.bins.remove(next.as_mut());

                let new_size = prev.as_ref().size()
                    + HEADER_SIZE
                    + block.as_ref().size()
                    + HEADER_SIZE
                    + next.as_ref().size();
                let after = next.as_ref().header.next_phys;

                let merged = prev.cast::<Block>();
                self.merge_into(merged, new_size, after);
                merged
            }

            // absorb the block into its free predecessor
            (Some(mut prev), None) => {
                self.bins.remove(prev.as_mut());

                let new_size = prev.as_ref().size() + HEADER_SIZE + block.as_ref().size();
                let after = block.as_ref().next_phys;

                let merged = prev.cast::<Block>();
                self.merge_into(merged, new_size, after);
                merged
            }

            // absorb the free successor into the block
            (None, Some(mut next)) => {
                self.bins.remove(next.as_mut());

                let new_size = block.as_ref().size() + HEADER_SIZE + next.as_ref().size();
                let after = next.as_ref().header.next_phys;

                self.merge_into(block, new_size, after);
                block
            }
        }
    }

    /// Rewrites the merged block's size and successor link, and back-patches
    /// the successor, or the heap tail when there is none.
    unsafe fn merge_into(
        &mut self,
        mut merged: BlockPtr,
        new_size: usize,
        after: Option<BlockPtr>,
    ) {
        let merged_ref = merged.as_mut();
        merged_ref.set_size(new_size);
        merged_ref.next_phys = after;

        match after {
            Some(mut next) => next.as_mut().prev_phys = Some(merged),
            None => self.heap_tail = Some(merged),
        }
    }

    /// Attaches a block living at the top of the heap as the new heap tail.
    /// Only the grow path appends: every other block is born by splitting
    /// one that is already linked.
    unsafe fn append_tail(&mut self, mut block: BlockPtr) {
        if let Some(old_tail) = self.heap_tail {
            debug_assert_eq!(old_tail.as_ref().end_addr(), block.as_ptr() as usize);
        }

        let block_ref = block.as_mut();
        block_ref.prev_phys = self.heap_tail;
        block_ref.next_phys = None;

        if let Some(mut old_tail) = self.heap_tail {
            old_tail.as_mut().next_phys = Some(block);
        }
        self.heap_tail = Some(block);
    }

    /// Drops the current heap tail from the physical list. Only the contract
    /// path pops: a block anywhere else dies by being merged into a
    /// neighbor.
    unsafe fn pop_tail(&mut self) {
        let Some(tail) = self.heap_tail else {
            return;
        };

        self.heap_tail = tail.as_ref().prev_phys;
        if let Some(mut new_tail) = self.heap_tail {
            new_tail.as_mut().next_phys = None;
        }
    }
}

unsafe impl<B: HeapBreak + Send> Send for Allocator<B> {}

/// A spin-locked allocator that can be used as the global allocator.
///
/// Layouts requesting an alignment beyond [`SIZE_MULTIPLE`] are refused with
/// a null return; the block engine only guarantees quantum alignment.
#[cfg(feature = "spin")]
pub struct SpinLockedAllocator<B: HeapBreak>(spin::Mutex<Allocator<B>>);

#[cfg(feature = "spin")]
impl<B: HeapBreak> SpinLockedAllocator<B> {
    /// Creates a spin-locked allocator drawing memory from the given heap
    /// break on demand.
    pub const fn new(brk: B) -> Self {
        Self(spin::Mutex::new(Allocator::new(brk)))
    }
}

#[cfg(feature = "spin")]
unsafe impl<B: HeapBreak + Send> core::alloc::GlobalAlloc for SpinLockedAllocator<B> {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        if layout.align() > SIZE_MULTIPLE {
            return core::ptr::null_mut();
        }

        let mut allocator = self.0.lock();
        allocator.alloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: core::alloc::Layout) {
        let mut allocator = self.0.lock();
        allocator.dealloc(ptr)
    }
}
