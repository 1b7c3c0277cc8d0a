//! Drives the allocator over the real program break and shows how the break
//! moves: it grows while requests outpace the bins and contracts back once
//! everything is released.
//!
//! Unix only. Run with `cargo run --example program_break`.

use balloc::{Allocator, HeapBreak, OsBreak};

fn main() {
    // print once before recording the baseline, so that stdio gets a chance
    // to allocate its own buffers first. The standard library's allocator
    // shares the program break with us, and anything it grabs after the
    // baseline would keep the break from contracting all the way back.
    println!("pid = {}", std::process::id());

    let mut allocator = Allocator::new(OsBreak);
    let baseline = allocator.break_source().current();

    let sizes = [24, 2000, 56, 64, 200, 16, 64, 40, 800, 512];
    let mut blocks = [core::ptr::null_mut::<u8>(); 10];
    for (slot, size) in blocks.iter_mut().zip(sizes) {
        *slot = unsafe { allocator.alloc(size) };
        assert!(!slot.is_null());
    }
    let after_allocating = allocator.break_source().current();

    // release in an order that keeps the tail busy until the end, so every
    // block either coalesces into a neighbor or contracts the heap
    for index in [5, 0, 2, 9, 6, 4, 7, 8, 1, 3] {
        unsafe { allocator.dealloc(blocks[index]) };
    }
    let after_releasing = allocator.break_source().current();

    println!("break at start:             {baseline:#x}");
    println!(
        "break after 10 allocations: {after_allocating:#x} (+{} bytes)",
        after_allocating - baseline
    );
    println!(
        "break after releasing all:  {after_releasing:#x} (+{} bytes)",
        after_releasing - baseline
    );
}
