
use super::*;

/// A heap break over a fixed region obtained from the system allocator, so
/// that tests can run many independent heaps and observe every break
/// movement.
struct ArenaBreak {
    base: usize,
    brk: usize,
    limit: usize,
}

unsafe impl HeapBreak for ArenaBreak {
    fn grow(&mut self, delta: usize) -> Option<usize> {
        if self.limit - self.brk < delta {
            return None;
        }

        let old_break = self.brk;
        self.brk += delta;
        Some(old_break)
    }

    unsafe fn shrink_to(&mut self, addr: usize) {
        assert!(addr >= self.base && addr <= self.brk);
        self.brk = addr;
    }

    fn current(&mut self) -> usize {
        self.brk
    }
}

/// A guard that backs an allocator with a region of memory on creation, and
/// frees that memory when dropped.
struct AllocatorInitGuard {
    addr: usize,
    layout: std::alloc::Layout,
    allocator: Allocator<ArenaBreak>,
}

impl AllocatorInitGuard {
    /// Creates an allocator over a fresh arena of the given size.
    fn init(mem_size: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(mem_size, SIZE_MULTIPLE).unwrap();
        let addr = unsafe { std::alloc::alloc(layout) } as usize;
        assert_ne!(addr, 0);

        Self {
            addr,
            layout,
            allocator: Allocator::new(ArenaBreak {
                base: addr,
                brk: addr,
                limit: addr + mem_size,
            }),
        }
    }

    /// The break address before anything was allocated.
    fn base(&self) -> usize {
        self.addr
    }

    /// The current break address.
    fn current_break(&mut self) -> usize {
        self.allocator.break_source().current()
    }
}

impl Drop for AllocatorInitGuard {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.addr as *mut u8, self.layout) }
    }
}

/// Walks the whole heap and checks every structural invariant.
///
/// The physical list must link up in both directions with byte-exact
/// adjacency and no two free neighbors. Every free block must sit in
/// exactly the bin its size selects, with the bins holding nothing else.
/// Every size must respect the quantum and the minimum.
fn check_heap(allocator: &mut Allocator<ArenaBreak>, heap_base: usize) {
    // collect the physical list back to front
    let mut blocks = Vec::new();
    let mut current = allocator.heap_tail;
    while let Some(block) = current {
        blocks.push(block);
        current = unsafe { block.as_ref() }.prev_phys;
    }
    blocks.reverse();

    match blocks.first() {
        Some(&first) => assert_eq!(
            first.as_ptr() as usize,
            heap_base,
            "the lowest block must sit at the heap base"
        ),
        None => assert_eq!(
            allocator.break_source().current(),
            heap_base,
            "an empty heap must have a fully contracted break"
        ),
    }

    let mut prev: Option<BlockPtr> = None;
    for &block in &blocks {
        let block_ref = unsafe { block.as_ref() };

        assert!(block_ref.size() >= MINIMUM_ALLOCATION);
        assert_eq!(block_ref.size() % SIZE_MULTIPLE, 0);

        assert_eq!(block_ref.prev_phys, prev, "broken back link in the physical list");
        if let Some(prev) = prev {
            let prev_ref = unsafe { prev.as_ref() };
            assert_eq!(
                prev_ref.end_addr(),
                block.as_ptr() as usize,
                "physical neighbors must be adjacent"
            );
            assert!(
                prev_ref.is_in_use() || block_ref.is_in_use(),
                "two adjacent blocks must never both be free"
            );
        }
        prev = Some(block);
    }

    for pair in blocks.windows(2) {
        assert_eq!(
            unsafe { pair[0].as_ref() }.next_phys,
            Some(pair[1]),
            "broken forward link in the physical list"
        );
    }
    if let Some(&tail) = blocks.last() {
        let tail_ref = unsafe { tail.as_ref() };
        assert_eq!(tail_ref.next_phys, None);
        assert_eq!(
            tail_ref.end_addr(),
            allocator.break_source().current(),
            "the tail must end exactly at the break"
        );
        assert!(tail_ref.is_in_use(), "a freed tail must have been contracted away");
    }

    // every free block is in the bin its size selects
    let free_blocks: Vec<BlockPtr> = blocks
        .iter()
        .copied()
        .filter(|block| !unsafe { block.as_ref() }.is_in_use())
        .collect();
    for &block in &free_blocks {
        let bin_index = size_to_bin(unsafe { block.as_ref() }.size());
        assert!(
            bin_contains(allocator, bin_index, block.cast()),
            "free block missing from the bin of its size"
        );
    }

    // and the bins hold nothing else: no used blocks, no stale entries
    let mut binned = 0;
    for bin_index in 0..BIN_COUNT {
        let mut prev_free: Option<FreeBlockPtr> = None;
        let mut current = allocator.bins.head(bin_index);
        while let Some(free) = current {
            let free_ref = unsafe { free.as_ref() };
            assert!(!free_ref.header.is_in_use(), "used block found in a bin");
            assert_eq!(
                size_to_bin(free_ref.size()),
                bin_index,
                "block listed in the wrong bin"
            );
            assert_eq!(free_ref.prev_free, prev_free, "broken back link in a free list");

            binned += 1;
            prev_free = Some(free);
            current = free_ref.next_free;
        }
    }
    assert_eq!(
        binned,
        free_blocks.len(),
        "every free block must be in exactly one bin"
    );
}

fn bin_contains(allocator: &Allocator<ArenaBreak>, bin_index: usize, block: FreeBlockPtr) -> bool {
    let mut current = allocator.bins.head(bin_index);
    while let Some(free) = current {
        if free == block {
            return true;
        }
        current = unsafe { free.as_ref() }.next_free;
    }
    false
}
