use std::fmt::Debug;

/// Bindings for the C heap primitives that the tracker instruments.
///
/// All calls into the real heap must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    fn malloc(&self, size: usize) -> *mut u8;

    fn calloc(&self, count: usize, size: usize) -> *mut u8;

    // Returns 0 on success, an errno value on failure. `memptr` is only written on success.
    fn posix_memalign(&self, memptr: &mut *mut u8, alignment: usize, size: usize) -> i32;

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer previously returned by this heap.
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer previously returned by this heap.
    unsafe fn free(&self, ptr: *mut u8);
}
