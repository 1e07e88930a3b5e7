use std::fmt;
use std::panic::Location;

use crate::constants::GLOBAL_ALLOCATOR_FILE;

/// Identifies the place in the source code where a tracked allocation was made.
///
/// A site is captured when memory is first allocated and stays attached to the allocation for its
/// whole life, including across any number of reallocations. Leaks are therefore always reported
/// at the place that created the allocation, never at the place that last resized it.
///
/// Sites can be supplied explicitly with [`site!`](crate::site) or [`SourceSite::new`], or
/// captured automatically with [`SourceSite::caller`], which is what the non-`_at` entry points
/// of [`LeakTracker`](crate::LeakTracker) do.
///
/// # Examples
///
/// ```
/// use leak_tracker::{SourceSite, site};
///
/// let explicit = SourceSite::new("parser.rs", 42);
/// assert_eq!(explicit.to_string(), "parser.rs:42");
///
/// let here = site!();
/// assert_eq!(here.file(), file!());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SourceSite {
    file: &'static str,
    line: u32,
}

impl SourceSite {
    /// Creates a site from an explicit file name and line number.
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Captures the location of the caller.
    ///
    /// Inside functions annotated with `#[track_caller]` this resolves to the location of their
    /// own caller, all the way up to the first function without the annotation.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }

    /// The site used for allocations that arrive through [`GlobalAlloc`](std::alloc::GlobalAlloc).
    ///
    /// The standard library calls the global allocator on behalf of user code, so there is no
    /// meaningful caller to attribute such allocations to.
    #[must_use]
    pub const fn global_allocator() -> Self {
        Self::new(GLOBAL_ALLOCATOR_FILE, 0)
    }

    /// The source file name.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// The line number within [`file()`](Self::file).
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }
}

impl From<&'static Location<'static>> for SourceSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Expands to the [`SourceSite`] of the macro invocation.
///
/// # Examples
///
/// ```
/// use leak_tracker::{LeakTracker, site};
///
/// let tracker = LeakTracker::new();
/// tracker.start();
///
/// let ptr = tracker.allocate_at(32, site!());
///
/// // SAFETY: Allocated above by the same tracker.
/// unsafe { tracker.release(ptr) };
///
/// assert!(tracker.stop().is_empty());
/// ```
#[macro_export]
macro_rules! site {
    () => {
        $crate::SourceSite::new(::core::file!(), ::core::line!())
    };
}
