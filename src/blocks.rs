use core::ptr::NonNull;

use crate::{divisible_by_8_usize::DivisibleBy8Usize, HEADER_SIZE};

/// The always-valid region of a block header.
///
/// Every block, used or free, starts with this record: the payload size with
/// the in-use flag packed into its low bits, and the physical-neighbor links
/// that coalescing relies on. The free-list links of [`FreeBlock`] live past
/// this region and overlay the start of the payload, so they must never be
/// touched while the block is in use.
#[repr(C)]
#[derive(Debug)]
pub struct Block {
    size_and_in_use: DivisibleBy8Usize,

    /// The neighboring blocks in address order. The previous block's end is
    /// this block's address; `None` at the lowest and highest ends of the
    /// heap.
    pub(crate) prev_phys: Option<BlockPtr>,
    pub(crate) next_phys: Option<BlockPtr>,
}

pub type BlockPtr = NonNull<Block>;

impl Block {
    /// Returns a [`BlockRef`] for the block at the given address.
    ///
    /// # Safety
    ///
    /// The address must hold a valid block.
    pub unsafe fn from_addr(addr: usize) -> BlockRef {
        let block = &mut *(addr as *mut Block);
        if block.is_in_use() {
            BlockRef::Used(UsedBlock::from_addr(addr))
        } else {
            BlockRef::Free(FreeBlock::from_addr(addr))
        }
    }

    /// Writes a block header at the given address and returns a pointer to
    /// it. Only the always-valid region is written; the free-list links of a
    /// free block stay undefined until the block is inserted into a bin.
    ///
    /// # Safety
    ///
    ///  - `addr` must be a valid non-null memory address which is not used by
    ///    any other block.
    ///  - `size` must be a multiple of the size quantum.
    pub unsafe fn create(
        addr: usize,
        size: usize,
        in_use: bool,
        prev_phys: Option<BlockPtr>,
        next_phys: Option<BlockPtr>,
    ) -> BlockPtr {
        let ptr = addr as *mut Block;

        ptr.write(Block {
            size_and_in_use: DivisibleBy8Usize::new_unchecked(size, in_use),
            prev_phys,
            next_phys,
        });

        NonNull::new_unchecked(ptr)
    }

    /// The payload size of the block, not including the header.
    pub fn size(&self) -> usize {
        self.size_and_in_use.value()
    }

    /// Sets the payload size of the block. The size must be a multiple of the
    /// size quantum, otherwise the function panics.
    pub fn set_size(&mut self, new_size: usize) {
        self.size_and_in_use.set_value(new_size);
    }

    /// Is this block owned by a caller?
    pub fn is_in_use(&self) -> bool {
        self.size_and_in_use.additional_bit()
    }

    /// Sets whether this block is owned by a caller or free.
    pub fn set_in_use(&mut self, in_use: bool) {
        self.size_and_in_use.set_additional_bit(in_use);
    }

    /// The address where this block starts.
    pub fn addr(&self) -> usize {
        self as *const _ as usize
    }

    /// The address of the block's payload, which is what the caller receives.
    pub fn content_addr(&self) -> usize {
        self.addr() + HEADER_SIZE
    }

    /// The address where this block ends (header plus payload).
    pub fn end_addr(&self) -> usize {
        self.content_addr() + self.size()
    }

    /// Returns the previous physical neighbor, if there is one and it is
    /// free.
    pub fn prev_phys_if_free(&self) -> Option<FreeBlockPtr> {
        let prev = self.prev_phys?;
        match unsafe { Block::from_addr(prev.as_ptr() as usize) } {
            BlockRef::Used(_) => None,
            BlockRef::Free(free) => Some(NonNull::from(free)),
        }
    }

    /// Returns the next physical neighbor, if there is one and it is free.
    pub fn next_phys_if_free(&self) -> Option<FreeBlockPtr> {
        let next = self.next_phys?;
        match unsafe { Block::from_addr(next.as_ptr() as usize) } {
            BlockRef::Used(_) => None,
            BlockRef::Free(free) => Some(NonNull::from(free)),
        }
    }
}

/// A block owned by a caller. Its payload starts where a free block's
/// free-list links would be.
#[repr(transparent)]
pub struct UsedBlock(pub(crate) Block);

pub type UsedBlockRef = &'static mut UsedBlock;

impl UsedBlock {
    /// Returns a [`UsedBlockRef`] for the block at the given address.
    ///
    /// # Safety
    ///
    /// The address must hold a valid block that is in use.
    pub unsafe fn from_addr(addr: usize) -> UsedBlockRef {
        &mut *(addr as *mut UsedBlock)
    }
}

/// A free block. The header's always-valid region is followed by the links
/// of the free list of the bin that owns the block; those two words double as
/// the first payload bytes once the block is handed out, which is why the
/// header size used for address arithmetic is the offset of `prev_free` and
/// never `size_of::<FreeBlock>()`.
#[repr(C)]
#[derive(Debug)]
pub struct FreeBlock {
    pub(crate) header: Block,

    /// Valid only while the block is on a free list.
    pub(crate) prev_free: Option<FreeBlockPtr>,
    pub(crate) next_free: Option<FreeBlockPtr>,
}

pub type FreeBlockRef = &'static mut FreeBlock;
pub type FreeBlockPtr = NonNull<FreeBlock>;

impl FreeBlock {
    /// Returns a [`FreeBlockRef`] for the block at the given address.
    ///
    /// # Safety
    ///
    /// The address must hold a valid block that is free.
    pub unsafe fn from_addr(addr: usize) -> FreeBlockRef {
        &mut *(addr as *mut FreeBlock)
    }

    /// The payload size of the block.
    pub fn size(&self) -> usize {
        self.header.size()
    }
}

/// A reference to a used or free block.
pub enum BlockRef {
    Used(UsedBlockRef),
    Free(FreeBlockRef),
}
