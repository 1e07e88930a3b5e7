use crate::{DEFAULT_ALLOC_FILL, DEFAULT_FREE_FILL};

/// Configures the behavior of a [`LeakTracker`](crate::LeakTracker).
///
/// All methods are `const`, so options can be assembled in the initializer of a `static`
/// global allocator.
///
/// # Examples
///
/// ```
/// use leak_tracker::{LeakTracker, Options};
///
/// static TRACKER: LeakTracker = LeakTracker::with_options(
///     Options::new()
///         .alloc_fill(None)
///         .warn_on_untracked_free(true),
/// );
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Options {
    alloc_fill: Option<u8>,
    free_fill: Option<u8>,
    warn_on_untracked_free: bool,
    warn_on_untracked_realloc: bool,
    print_report_on_stop: bool,
}

impl Options {
    /// Creates the default options.
    ///
    /// * New allocations are filled with [`DEFAULT_ALLOC_FILL`].
    /// * Released allocations are filled with [`DEFAULT_FREE_FILL`].
    /// * Releasing or reallocating untracked memory is silent.
    /// * [`LeakTracker::stop()`](crate::LeakTracker::stop) prints the leak report to stderr.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alloc_fill: Some(DEFAULT_ALLOC_FILL),
            free_fill: Some(DEFAULT_FREE_FILL),
            warn_on_untracked_free: false,
            warn_on_untracked_realloc: false,
            print_report_on_stop: true,
        }
    }

    /// Sets the byte written over memory returned by `allocate` and `allocate_aligned`, and over
    /// the grown part of a reallocated block. `None` leaves the memory as the heap returned it.
    ///
    /// Zeroed allocations are never filled.
    #[must_use]
    pub const fn alloc_fill(mut self, value: Option<u8>) -> Self {
        self.alloc_fill = value;
        self
    }

    /// Sets the byte written over a tracked block right before it is returned to the heap.
    /// `None` disables the fill.
    #[must_use]
    pub const fn free_fill(mut self, value: Option<u8>) -> Self {
        self.free_fill = value;
        self
    }

    /// Whether to log a warning when memory without a tracking record is released while
    /// tracking is enabled.
    ///
    /// This is expected for memory allocated before tracking started, so it is off by default.
    #[must_use]
    pub const fn warn_on_untracked_free(mut self, enabled: bool) -> Self {
        self.warn_on_untracked_free = enabled;
        self
    }

    /// Whether to log a warning when memory without a tracking record is reallocated while
    /// tracking is enabled. Such memory stays untracked after the reallocation.
    #[must_use]
    pub const fn warn_on_untracked_realloc(mut self, enabled: bool) -> Self {
        self.warn_on_untracked_realloc = enabled;
        self
    }

    /// Whether [`LeakTracker::stop()`](crate::LeakTracker::stop) prints the leak report to
    /// stderr in addition to returning it.
    #[must_use]
    pub const fn print_report_on_stop(mut self, enabled: bool) -> Self {
        self.print_report_on_stop = enabled;
        self
    }

    pub(crate) const fn alloc_fill_value(&self) -> Option<u8> {
        self.alloc_fill
    }

    pub(crate) const fn free_fill_value(&self) -> Option<u8> {
        self.free_fill
    }

    pub(crate) const fn warns_on_untracked_free(&self) -> bool {
        self.warn_on_untracked_free
    }

    pub(crate) const fn warns_on_untracked_realloc(&self) -> bool {
        self.warn_on_untracked_realloc
    }

    pub(crate) const fn prints_report_on_stop(&self) -> bool {
        self.print_report_on_stop
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
