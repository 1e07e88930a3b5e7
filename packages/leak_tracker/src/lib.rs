#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Debug-time heap allocation tracking that reports leaks and exposes use-after-free.
//!
//! This package wraps the C heap primitives (`malloc`, `calloc`, `posix_memalign`, `realloc`,
//! `free`) with a tracker that records every live allocation made while tracking is enabled,
//! attributes each one to the place in the source code that made it, and reports the ones that
//! were never released when tracking stops.
//!
//! The core functionality includes:
//! - [`LeakTracker`] - The instrumented heap entry points and the `start`/`stop` lifecycle
//! - [`LeakReport`] - The allocations still live at `stop`, printable one line per leak
//! - [`SourceSite`] - The call-site identity attached to each allocation
//! - [`Options`] - Sentinel fill bytes and diagnostic settings
//!
//! This package is not meant for use in production, serving only as a development tool. With
//! tracking disabled the tracker behaves exactly like the heap it wraps.
//!
//! # Simple usage
//!
//! ```
//! use leak_tracker::LeakTracker;
//!
//! let tracker = LeakTracker::new();
//! tracker.start();
//!
//! let buffer = tracker.allocate(128);
//! let table = tracker.allocate_zeroed(16, 8);
//!
//! // SAFETY: Allocated by this tracker and not yet released.
//! unsafe { tracker.release(buffer) };
//!
//! // Prints "address 0x... (allocated at src/lib.rs:.., size 128) is not freed" and a total.
//! let report = tracker.stop();
//! assert_eq!(report.len(), 1);
//! # // SAFETY: Allocated by this tracker and not yet released.
//! # unsafe { tracker.release(table) };
//! ```
//!
//! # Attribution
//!
//! Every entry point that creates an allocation comes in two forms. The plain form (for example
//! [`LeakTracker::allocate`]) records the location of its caller automatically, while the `_at`
//! form (for example [`LeakTracker::allocate_at`]) accepts an explicit [`SourceSite`], which can
//! be produced with the [`site!`] macro.
//!
//! Reallocation keeps the site of the original allocation, so a leak is always reported where
//! the memory was first allocated rather than where it was last resized.
//!
//! # Sentinel fills
//!
//! While tracking is enabled, fresh memory is filled with [`DEFAULT_ALLOC_FILL`] and memory that
//! is about to be released is filled with [`DEFAULT_FREE_FILL`]. Reads of uninitialized memory
//! and reads after release therefore produce recognizable values. Zeroed allocations are never
//! filled. Both bytes can be changed or disabled through [`Options`].
//!
//! # Global allocator
//!
//! A [`LeakTracker`] can track all Rust heap allocations in the process:
//!
//! ```
//! use leak_tracker::LeakTracker;
//!
//! #[global_allocator]
//! static TRACKER: LeakTracker = LeakTracker::new();
//!
//! fn main() {
//!     TRACKER.start();
//!     let leaked = Box::leak(Box::new([0_u8; 64]));
//!     let report = TRACKER.stop();
//!
//!     assert!(report.leaks().iter().any(|leak| leak.address() == leaked.as_ptr().addr()));
//! }
//! ```
//!
//! # Thread safety
//!
//! All entry points may be called concurrently from any number of threads. A single lock guards
//! the tracking state. Tracker-internal invariant violations (such as the heap returning an
//! address that is still tracked) abort the process, since continuing would silently corrupt
//! leak accounting.
//!
//! # Miri compatibility
//!
//! Miri does not support calling into the C heap, so you cannot execute code that uses this
//! package under Miri.

#[cfg(not(unix))]
compile_error!("leak_tracker wraps the C heap via posix_memalign() and only supports Unix targets");

mod allocator;
mod constants;
mod error;
mod index;
mod options;
mod pal;
mod report;
mod scope;
mod site;
mod state;
mod tracker;

pub use constants::{DEFAULT_ALLOC_FILL, DEFAULT_FREE_FILL};
pub use error::*;
pub use index::AllocationRecord;
pub use options::*;
pub use report::*;
pub use scope::*;
pub use site::*;
pub use tracker::*;
