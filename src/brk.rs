/// A source of contiguous memory obtained by moving a program break.
///
/// The allocator grows the break when no binned block can satisfy a request
/// and lowers it back when the block at the top of the heap is released.
///
/// # Safety
///
/// Implementations must hand out exclusive, writable memory, and consecutive
/// successful calls to [`grow`](HeapBreak::grow) must return contiguous
/// ranges: the address returned by a grow must equal the end of the range
/// returned by the previous one. The allocator's physical-neighbor arithmetic
/// is built on that contiguity.
pub unsafe trait HeapBreak {
    /// Moves the break up by `delta` bytes and returns the previous break
    /// address, or `None` if the host refuses to extend the segment.
    fn grow(&mut self, delta: usize) -> Option<usize>;

    /// Moves the break down to the given address, returning the memory above
    /// it to the host.
    ///
    /// # Safety
    ///
    /// `addr` must lie within a range previously obtained through
    /// [`grow`](HeapBreak::grow), and the memory at and above `addr` must no
    /// longer be referenced.
    unsafe fn shrink_to(&mut self, addr: usize);

    /// The current break address.
    fn current(&mut self) -> usize;
}

/// The process program break, moved with `sbrk(2)` and `brk(2)`.
///
/// There is only one program break per process, so at most one allocator may
/// be driven by this source, and nothing else in the process should move the
/// break while it is in use.
#[cfg(all(feature = "os", unix))]
#[derive(Debug)]
pub struct OsBreak;

#[cfg(all(feature = "os", unix))]
unsafe impl HeapBreak for OsBreak {
    fn grow(&mut self, delta: usize) -> Option<usize> {
        let old_break = unsafe { libc::sbrk(delta as libc::intptr_t) };

        // sbrk reports failure as -1 cast to a pointer
        if old_break as isize == -1 {
            return None;
        }

        Some(old_break as usize)
    }

    unsafe fn shrink_to(&mut self, addr: usize) {
        let _ = unsafe { libc::brk(addr as *mut libc::c_void) };
    }

    fn current(&mut self) -> usize {
        unsafe { libc::sbrk(0) as usize }
    }
}
