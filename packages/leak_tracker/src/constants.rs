pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - the allocation index may be \
    inconsistent, so leak accounting can no longer be trusted";

/// Byte written over freshly allocated memory, exposing reads of uninitialized memory.
pub const DEFAULT_ALLOC_FILL: u8 = 0xFF;

/// Byte written over memory just before it is returned to the heap, exposing use-after-free.
pub const DEFAULT_FREE_FILL: u8 = 0x11;

/// File name reported for allocations that arrive through the global allocator interface.
pub(crate) const GLOBAL_ALLOCATOR_FILE: &str = "<global allocator>";
