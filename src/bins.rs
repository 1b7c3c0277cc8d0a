use core::ptr::NonNull;

use static_assertions::const_assert;

use crate::{
    blocks::{FreeBlock, FreeBlockPtr, FreeBlockRef},
    MINIMUM_ALLOCATION, SIZE_MULTIPLE,
};

/// The largest payload size that has a dedicated bin. Free blocks with a
/// bigger payload all share the overflow bin.
pub const BIGGEST_BINNED_SIZE: usize = 512;

/// How many bins there are. Bin 0 holds blocks of the minimum payload size,
/// each following bin holds the next multiple of the size quantum, and the
/// last bin is the overflow bin.
pub const BIN_COUNT: usize = 2 + (BIGGEST_BINNED_SIZE - MINIMUM_ALLOCATION) / SIZE_MULTIPLE;

/// The index of the overflow bin.
pub const OVERFLOW_BIN: usize = BIN_COUNT - 1;

const_assert!(BIGGEST_BINNED_SIZE % SIZE_MULTIPLE == 0);
const_assert!(BIN_COUNT == 64);

/// Rounds a requested payload size up to a binnable size: the minimum
/// allocation for small requests, the next multiple of the size quantum
/// otherwise.
pub fn round_up_size(size: usize) -> usize {
    if size == 0 {
        0
    } else if size < MINIMUM_ALLOCATION {
        MINIMUM_ALLOCATION
    } else {
        (size + (SIZE_MULTIPLE - 1)) & !(SIZE_MULTIPLE - 1)
    }
}

/// Gives the index of the bin holding free blocks of the given payload size.
pub fn size_to_bin(size: usize) -> usize {
    debug_assert!(size > 0);

    let bin = (round_up_size(size) - MINIMUM_ALLOCATION) / SIZE_MULTIPLE;
    if bin > OVERFLOW_BIN {
        OVERFLOW_BIN
    } else {
        bin
    }
}

/// The array of size-segregated free lists.
///
/// Each bin heads a doubly linked list woven through the free blocks whose
/// size maps to it. Every small bin is size-homogeneous by construction; the
/// overflow bin mixes sizes and is searched first fit.
pub struct Bins {
    heads: [Option<FreeBlockPtr>; BIN_COUNT],
}

impl Bins {
    /// Creates an array of empty bins.
    pub const fn new() -> Self {
        Self {
            heads: [None; BIN_COUNT],
        }
    }

    /// The first block of the bin with the given index.
    pub fn head(&self, bin_index: usize) -> Option<FreeBlockPtr> {
        self.heads[bin_index]
    }

    /// Pushes the given block at the head of the bin matching its size.
    ///
    /// # Safety
    ///
    /// The block must be marked free and must not currently be in any bin.
    pub unsafe fn insert(&mut self, block: FreeBlockRef) {
        let bin_index = size_to_bin(block.size());

        block.prev_free = None;
        block.next_free = self.heads[bin_index];
        if let Some(mut old_head) = self.heads[bin_index] {
            old_head.as_mut().prev_free = Some(NonNull::from(&mut *block));
        }
        self.heads[bin_index] = Some(NonNull::from(block));
    }

    /// Splices the given block out of the bin that it is in.
    ///
    /// The bin is recomputed from the block's size. That is sound because bin
    /// membership is a pure function of size, and the size cannot change
    /// while the block is listed.
    ///
    /// # Safety
    ///
    /// The block must currently be in the bin matching its size.
    pub unsafe fn remove(&mut self, block: &mut FreeBlock) {
        let bin_index = size_to_bin(block.size());

        match (block.prev_free, block.next_free) {
            // the block is the only one in its bin
            (None, None) => self.heads[bin_index] = None,
            // the block is at the head, advance the head to its successor
            (None, Some(mut next)) => {
                next.as_mut().prev_free = None;
                self.heads[bin_index] = Some(next);
            }
            // the block is at the end of the list
            (Some(mut prev), None) => {
                prev.as_mut().next_free = None;
            }
            // the block is in the middle, join its neighbors
            (Some(mut prev), Some(mut next)) => {
                prev.as_mut().next_free = Some(next);
                next.as_mut().prev_free = Some(prev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_size_steps_through_the_quantum() {
        assert_eq!(round_up_size(0), 0);
        assert_eq!(round_up_size(1), MINIMUM_ALLOCATION);
        assert_eq!(round_up_size(MINIMUM_ALLOCATION), MINIMUM_ALLOCATION);
        assert_eq!(round_up_size(17), 24);
        assert_eq!(round_up_size(24), 24);
        assert_eq!(round_up_size(25), 32);
    }

    #[test]
    fn size_to_bin_covers_the_whole_table() {
        assert_eq!(size_to_bin(1), 0);
        assert_eq!(size_to_bin(MINIMUM_ALLOCATION), 0);
        assert_eq!(size_to_bin(17), 1);
        assert_eq!(size_to_bin(24), 1);
        assert_eq!(size_to_bin(BIGGEST_BINNED_SIZE), OVERFLOW_BIN - 1);
        assert_eq!(size_to_bin(BIGGEST_BINNED_SIZE + 1), OVERFLOW_BIN);
        assert_eq!(size_to_bin(4096), OVERFLOW_BIN);
    }
}
