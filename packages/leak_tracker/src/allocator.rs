//! Global allocator adapter for tracking every heap allocation in the process.

use std::alloc::{GlobalAlloc, Layout};
use std::cmp;
use std::ptr;

use crate::pal::Bindings;
use crate::{LeakTracker, SourceSite};

// The alignment that the C heap guarantees for `malloc`, `calloc` and `realloc` results.
#[cfg(target_pointer_width = "64")]
const MIN_ALIGN: usize = 16;
#[cfg(not(target_pointer_width = "64"))]
const MIN_ALIGN: usize = 8;

/// Whether the plain (unaligned) heap primitives satisfy the layout.
///
/// Small blocks may be less aligned than `MIN_ALIGN`, so the size also has to be at least as
/// large as the alignment.
#[inline]
const fn fits_plain_heap(align: usize, size: usize) -> bool {
    align <= MIN_ALIGN && align <= size
}

// posix_memalign() requires a multiple of the pointer size.
#[inline]
fn memalign_alignment(layout: Layout) -> usize {
    cmp::max(layout.align(), size_of::<usize>())
}

impl LeakTracker {
    fn alloc_over_aligned(&self, layout: Layout) -> *mut u8 {
        let mut ptr = ptr::null_mut();

        match self.allocate_aligned_at(
            &mut ptr,
            memalign_alignment(layout),
            layout.size(),
            SourceSite::global_allocator(),
        ) {
            0 => ptr,
            _ => ptr::null_mut(),
        }
    }

    // Moving an untracked block must not make its replacement tracked.
    fn alloc_over_aligned_untracked(&self, layout: Layout) -> *mut u8 {
        let mut ptr = ptr::null_mut();

        match self
            .bindings
            .posix_memalign(&mut ptr, memalign_alignment(layout), layout.size())
        {
            0 => ptr,
            _ => ptr::null_mut(),
        }
    }
}

/// Installs the tracker as the process-wide allocator.
///
/// Every allocation made by Rust code goes through the tracker. Allocations made while tracking
/// is enabled are attributed to [`SourceSite::global_allocator()`], because the standard library
/// calls the allocator on behalf of user code and there is no meaningful caller to record.
///
/// Memory allocated by the tracker's own bookkeeping is never tracked.
///
/// # Examples
///
/// ```
/// use leak_tracker::LeakTracker;
///
/// #[global_allocator]
/// static TRACKER: LeakTracker = LeakTracker::new();
///
/// fn main() {
///     TRACKER.start();
///
///     let data = vec![1_u64, 2, 3];
///     drop(data);
///
///     let report = TRACKER.stop();
///     assert!(report.is_empty());
/// }
/// ```
// SAFETY: Every call is forwarded to the C heap, which upholds the GlobalAlloc contract as long
// as over-aligned layouts are routed through posix_memalign(), which we do.
unsafe impl GlobalAlloc for LeakTracker {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if fits_plain_heap(layout.align(), layout.size()) {
            self.allocate_at(layout.size(), SourceSite::global_allocator())
        } else {
            self.alloc_over_aligned(layout)
        }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if fits_plain_heap(layout.align(), layout.size()) {
            return self.allocate_zeroed_at(1, layout.size(), SourceSite::global_allocator());
        }

        let ptr = self.alloc_over_aligned(layout);

        if !ptr.is_null() {
            // SAFETY: The block was just allocated with `layout.size()` bytes.
            unsafe { ptr.write_bytes(0, layout.size()) };
        }

        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: The caller guarantees `ptr` was allocated by this allocator.
        unsafe { self.release_at(ptr, SourceSite::global_allocator()) };
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if fits_plain_heap(layout.align(), new_size) {
            // SAFETY: The caller guarantees `ptr` was allocated by this allocator.
            return unsafe { self.reallocate(ptr, new_size) };
        }

        // SAFETY: The caller guarantees that `new_size`, rounded up to the alignment, does not
        // overflow, and the alignment comes from a valid layout.
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };

        // realloc() cannot preserve over-alignment, so move the block ourselves.
        let tracked = self.is_tracked(ptr);

        let new_ptr = if tracked {
            // SAFETY: Forwarding to our own alloc() with a valid layout.
            unsafe { self.alloc(new_layout) }
        } else {
            self.alloc_over_aligned_untracked(new_layout)
        };

        if new_ptr.is_null() {
            return new_ptr;
        }

        // SAFETY: Both blocks are live, distinct and at least this many bytes long.
        unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, cmp::min(layout.size(), new_size)) };

        if tracked {
            // SAFETY: The caller guarantees `ptr` was allocated by this allocator.
            unsafe { self.release_at(ptr, SourceSite::global_allocator()) };
        } else {
            // SAFETY: The caller guarantees `ptr` was allocated by this allocator.
            unsafe { self.bindings.free(ptr) };
        }

        new_ptr
    }
}
