use std::ffi::c_void;

use crate::pal::Bindings;

/// Bindings that call into the C runtime of the build target.
///
/// You would only use different bindings in unit tests that need to observe or fake the heap.
/// Even then, whenever possible, unit tests should use real bindings for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

impl Bindings for BuildTargetBindings {
    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: No safety requirements beyond passing a size.
        unsafe { libc::malloc(size) }.cast()
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        // SAFETY: No safety requirements; overflow of count * size is reported as null.
        unsafe { libc::calloc(count, size) }.cast()
    }

    fn posix_memalign(&self, memptr: &mut *mut u8, alignment: usize, size: usize) -> i32 {
        let mut allocated: *mut c_void = std::ptr::null_mut();

        // SAFETY: We pass a valid out-pointer; invalid alignments are reported via the result.
        let result = unsafe { libc::posix_memalign(&raw mut allocated, alignment, size) };

        if result == 0 {
            *memptr = allocated.cast();
        }

        result
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: Forwarding the caller's guarantee that `ptr` came from this heap.
        unsafe { libc::realloc(ptr.cast(), size) }.cast()
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: Forwarding the caller's guarantee that `ptr` came from this heap.
        unsafe { libc::free(ptr.cast()) }
    }
}
