//! The instrumented heap entry points.

use std::fmt;
use std::io::{self, Write};
use std::process;
use std::ptr;

use tracing::{debug, error, trace, warn};

use crate::error::Error;
use crate::pal::{Bindings, BindingsFacade};
use crate::state::TrackingState;
use crate::{AllocationRecord, LeakReport, Options, SourceSite, TrackingScope};

/// Tracks every live heap allocation made through it while tracking is enabled, and reports the
/// ones that were never released when tracking stops.
///
/// The tracker wraps the C heap primitives `malloc`, `calloc`, `posix_memalign`, `realloc` and
/// `free`. Each entry point performs the real heap operation and then, if the operation
/// succeeded and tracking is enabled, updates an address-ordered index of live allocations.
/// When tracking is disabled every entry point behaves exactly like the primitive it wraps.
///
/// While tracking, new memory is filled with [`DEFAULT_ALLOC_FILL`](crate::DEFAULT_ALLOC_FILL)
/// to expose reads of uninitialized memory and released memory is filled with
/// [`DEFAULT_FREE_FILL`](crate::DEFAULT_FREE_FILL) to expose use-after-free. Both can be
/// changed via [`Options`].
///
/// A tracker is a plain value. Several independent trackers may coexist, and a tracker may also
/// be installed as the global allocator (see [`GlobalAlloc`](std::alloc::GlobalAlloc)).
///
/// # Examples
///
/// ```
/// use leak_tracker::LeakTracker;
///
/// let tracker = LeakTracker::new();
/// tracker.start();
///
/// let kept = tracker.allocate(100);
/// let forgotten = tracker.allocate(200);
///
/// // SAFETY: Allocated by this tracker and not yet released.
/// unsafe { tracker.release(kept) };
///
/// let report = tracker.stop();
/// assert_eq!(report.len(), 1);
/// assert_eq!(report.leaks()[0].address(), forgotten.addr());
/// assert_eq!(report.leaks()[0].size(), 200);
/// # // SAFETY: Allocated by this tracker and not yet released.
/// # unsafe { tracker.release(forgotten) };
/// ```
pub struct LeakTracker {
    pub(crate) bindings: BindingsFacade,
    options: Options,
    state: TrackingState,
}

impl LeakTracker {
    /// Creates a disabled tracker with default [`Options`] over the C runtime heap.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_options(Options::new())
    }

    /// Creates a disabled tracker with the given options over the C runtime heap.
    #[must_use]
    pub const fn with_options(options: Options) -> Self {
        Self {
            bindings: BindingsFacade::real(),
            options,
            state: TrackingState::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_bindings(bindings: BindingsFacade, options: Options) -> Self {
        Self {
            bindings,
            options,
            state: TrackingState::new(),
        }
    }

    /// Begins a tracking epoch.
    ///
    /// The index is reset to empty. If records from a previous epoch are still present (only
    /// possible when `start()` is called twice without `stop()` in between) they are discarded
    /// with a warning.
    pub fn start(&self) {
        let (epoch, stale) = self.state.start();

        if stale != 0 {
            warn!(
                epoch,
                stale, "leak tracking restarted, discarding records of the previous epoch"
            );
        }

        debug!(epoch, "leak tracking started");
    }

    /// Ends the tracking epoch and reports every tracked allocation that was never released.
    ///
    /// Tracking is disabled before the index is examined, so concurrent heap calls made while
    /// this runs are simply not tracked. The index is empty when this returns. Leaked memory is
    /// not released; only its tracking records are.
    ///
    /// Unless disabled via [`Options::print_report_on_stop`], the report is also printed to
    /// stderr.
    pub fn stop(&self) -> LeakReport {
        let (epoch, leaks) = self.state.stop();
        let report = LeakReport::new(leaks);

        if report.is_empty() {
            debug!(epoch, "leak tracking stopped, no leaks");
        } else {
            warn!(
                epoch,
                leaks = report.len(),
                bytes = report.total_bytes(),
                "leak tracking stopped with unreleased allocations"
            );
        }

        if self.options.prints_report_on_stop() {
            report.print_to_stderr();
        }

        report
    }

    /// Begins a tracking epoch that ends when the returned scope is finished or dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use leak_tracker::LeakTracker;
    ///
    /// let tracker = LeakTracker::new();
    ///
    /// let scope = tracker.scope();
    /// let ptr = tracker.allocate(8);
    /// // SAFETY: Allocated by this tracker and not yet released.
    /// unsafe { tracker.release(ptr) };
    ///
    /// assert!(scope.finish().is_empty());
    /// assert!(!tracker.is_enabled());
    /// ```
    pub fn scope(&self) -> TrackingScope<'_> {
        TrackingScope::new(self)
    }

    /// Whether tracking is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock_always().enabled
    }

    /// The number of allocations currently being tracked.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock_always().index.len()
    }

    /// Looks up the tracking record for an address.
    ///
    /// Returns `None` if the address is not the start of a live tracked allocation.
    #[must_use]
    pub fn find(&self, ptr: *const u8) -> Option<AllocationRecord> {
        self.state.lock_always().index.find(ptr.addr()).copied()
    }

    /// Allocates `size` bytes, like `malloc`, attributing the allocation to the caller.
    ///
    /// Returns null if the heap is exhausted, in which case nothing is tracked.
    #[must_use]
    #[track_caller]
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.allocate_at(size, SourceSite::caller())
    }

    /// Allocates `size` bytes, like `malloc`, attributing the allocation to `site`.
    #[must_use]
    pub fn allocate_at(&self, size: usize, site: SourceSite) -> *mut u8 {
        let ptr = self.bindings.malloc(size);

        if !ptr.is_null() {
            self.track_new(ptr, size, site, self.options.alloc_fill_value());
        }

        ptr
    }

    /// Allocates zero-initialized memory for `count` elements of `size` bytes, like `calloc`,
    /// attributing the allocation to the caller.
    ///
    /// The memory is all zeroes whether or not tracking is enabled. Returns null if the heap is
    /// exhausted or `count * size` overflows.
    #[must_use]
    #[track_caller]
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        self.allocate_zeroed_at(count, size, SourceSite::caller())
    }

    /// Allocates zero-initialized memory, like `calloc`, attributing the allocation to `site`.
    #[must_use]
    pub fn allocate_zeroed_at(&self, count: usize, size: usize, site: SourceSite) -> *mut u8 {
        let ptr = self.bindings.calloc(count, size);

        if !ptr.is_null() {
            // calloc() already rejected an overflowing product by returning null.
            let extent = count.saturating_mul(size);
            self.track_new(ptr, extent, site, None);
        }

        ptr
    }

    /// Allocates `size` bytes aligned to `alignment`, like `posix_memalign`, attributing the
    /// allocation to the caller.
    ///
    /// Returns the status code of the real heap unmodified: 0 on success (with `*memptr` set to
    /// the new allocation), otherwise an errno value (with `*memptr` untouched).
    #[must_use]
    #[track_caller]
    pub fn allocate_aligned(&self, memptr: &mut *mut u8, alignment: usize, size: usize) -> i32 {
        self.allocate_aligned_at(memptr, alignment, size, SourceSite::caller())
    }

    /// Allocates aligned memory, like `posix_memalign`, attributing the allocation to `site`.
    #[must_use]
    pub fn allocate_aligned_at(
        &self,
        memptr: &mut *mut u8,
        alignment: usize,
        size: usize,
        site: SourceSite,
    ) -> i32 {
        let result = self.bindings.posix_memalign(memptr, alignment, size);

        // A zero-sized request may succeed without producing a block.
        if result == 0 && !memptr.is_null() {
            self.track_new(*memptr, size, site, self.options.alloc_fill_value());
        }

        result
    }

    /// Resizes an allocation, like `realloc`.
    ///
    /// If `ptr` is tracked, the record moves to the new address with the new size but keeps the
    /// site of the original allocation, so leaks are reported where memory was first allocated.
    /// If `ptr` is not tracked, the resized allocation is not tracked either.
    ///
    /// Returns null if the heap is exhausted (the original allocation stays valid and tracked),
    /// or if `new_size` is zero and the heap chose to release `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this tracker (or by the C heap directly).
    #[must_use]
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let Some(mut state) = self.state.lock() else {
            // SAFETY: Forwarding the caller's guarantee.
            return unsafe { self.bindings.realloc(ptr, new_size) };
        };

        // The lock is held across the real call so that the old address cannot be handed to
        // another thread and indexed there before its record has been moved.
        // SAFETY: Forwarding the caller's guarantee.
        let new_ptr = unsafe { self.bindings.realloc(ptr, new_size) };

        if !state.enabled {
            return new_ptr;
        }

        if new_ptr.is_null() {
            if new_size == 0
                && !ptr.is_null()
                && let Some(old) = state.index.remove(ptr.addr())
            {
                // The heap released the old block rather than resizing it.
                let _scope = state.unlock();
                trace!(
                    address = ptr.addr(),
                    size = old.size(),
                    allocated_at = %old.site(),
                    "released by reallocation to zero bytes"
                );
            }

            return new_ptr;
        }

        let Some(old) = state.index.remove(ptr.addr()) else {
            let _scope = state.unlock();

            if self.options.warns_on_untracked_realloc() && !ptr.is_null() {
                warn!(
                    address = ptr.addr(),
                    new_address = new_ptr.addr(),
                    "reallocated memory that is not tracked, it remains untracked"
                );
            }

            return new_ptr;
        };

        if let Some(fill) = self.options.alloc_fill_value()
            && new_size > old.size()
        {
            // SAFETY: The new block is `new_size` bytes long, so the range past the preserved
            // prefix is in bounds.
            unsafe {
                new_ptr
                    .add(old.size())
                    .write_bytes(fill, new_size.wrapping_sub(old.size()));
            }
        }

        let moved = AllocationRecord::new(new_ptr.addr(), new_size, old.site());

        if let Err(e) = state.index.insert(moved) {
            drop(state);
            abort_on(&e);
        }

        let _scope = state.unlock();
        trace!(
            address = ptr.addr(),
            new_address = new_ptr.addr(),
            size = new_size,
            allocated_at = %old.site(),
            "reallocated"
        );

        new_ptr
    }

    /// Releases an allocation, like `free`, attributing the release to the caller.
    ///
    /// If `ptr` is tracked, its record is removed and, unless disabled, its bytes are filled
    /// with the free sentinel before the real `free` runs. Untracked pointers (never tracked or
    /// already released) are passed to the real `free` without any index changes. Either way
    /// the real `free` is called exactly once.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this tracker (or by the C heap directly).
    #[track_caller]
    pub unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: Forwarding the caller's guarantee.
        unsafe { self.release_at(ptr, SourceSite::caller()) };
    }

    /// Releases an allocation, like `free`, attributing the release to `site`.
    ///
    /// The site only appears in diagnostics; leak reports always name the allocation site.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this tracker (or by the C heap directly).
    pub unsafe fn release_at(&self, ptr: *mut u8, site: SourceSite) {
        if let Some(mut state) = self.state.lock()
            && state.enabled
        {
            let removed = state.index.remove(ptr.addr());

            if let Some(record) = removed
                && let Some(fill) = self.options.free_fill_value()
            {
                // SAFETY: The record describes a live block of `size` bytes at `ptr`.
                unsafe { ptr.write_bytes(fill, record.size()) };
            }

            let _scope = state.unlock();

            match removed {
                Some(record) => trace!(
                    address = ptr.addr(),
                    size = record.size(),
                    allocated_at = %record.site(),
                    released_at = %site,
                    "released"
                ),
                None if self.options.warns_on_untracked_free() && !ptr.is_null() => warn!(
                    address = ptr.addr(),
                    %site,
                    "released memory that is not tracked"
                ),
                None => {}
            }
        }

        // SAFETY: Forwarding the caller's guarantee.
        unsafe { self.bindings.free(ptr) };
    }

    /// Whether `ptr` is the start of an allocation tracked in the current epoch.
    ///
    /// Calls made from inside bookkeeping see nothing as tracked, matching how their own
    /// allocations bypass tracking.
    pub(crate) fn is_tracked(&self, ptr: *const u8) -> bool {
        self.state
            .lock()
            .is_some_and(|state| state.enabled && state.index.find(ptr.addr()).is_some())
    }

    fn track_new(&self, ptr: *mut u8, size: usize, site: SourceSite, fill: Option<u8>) {
        let Some(mut state) = self.state.lock() else {
            return;
        };

        if !state.enabled {
            return;
        }

        if let Some(fill) = fill {
            // SAFETY: The heap just returned a block of at least `size` bytes at `ptr`.
            unsafe { ptr.write_bytes(fill, size) };
        }

        if let Err(e) = state.index.insert(AllocationRecord::new(ptr.addr(), size, site)) {
            drop(state);
            abort_on(&e);
        }

        let _scope = state.unlock();
        trace!(address = ptr.addr(), size, %site, "allocated");
    }
}

impl Default for LeakTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LeakTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakTracker")
            .field("bindings", &self.bindings)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// An index invariant was violated. Continuing would silently corrupt leak accounting, and
/// unwinding out of a heap entry point is not an option, so the process is aborted.
#[cfg_attr(test, mutants::skip)] // Aborts the test process.
fn abort_on(e: &Error) -> ! {
    error!(error = %e, "leak tracker invariant violated, aborting");

    _ = writeln!(io::stderr().lock(), "leak tracker: {e}");

    process::abort();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use mockall::Sequence;
    use static_assertions::assert_impl_all;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;
    use crate::pal::{BuildTargetBindings, MockBindings};

    assert_impl_all!(LeakTracker: Send, Sync);

    fn quiet() -> Options {
        Options::new().print_report_on_stop(false)
    }

    fn tracker() -> LeakTracker {
        LeakTracker::with_options(quiet())
    }

    /// Mock heap that forwards to the real heap and lets tests observe each call to `free`.
    fn observed_heap(on_free: impl Fn(*mut u8) + Send + 'static) -> MockBindings {
        let mut mock = MockBindings::new();

        mock.expect_malloc()
            .returning(|size| BuildTargetBindings.malloc(size));
        mock.expect_calloc()
            .returning(|count, size| BuildTargetBindings.calloc(count, size));
        mock.expect_posix_memalign()
            .returning(|memptr, alignment, size| {
                BuildTargetBindings.posix_memalign(memptr, alignment, size)
            });
        mock.expect_realloc()
            // SAFETY: The tracker forwards pointers that came from this heap.
            .returning(|ptr, size| unsafe { BuildTargetBindings.realloc(ptr, size) });
        mock.expect_free().returning(move |ptr| {
            on_free(ptr);
            // SAFETY: The tracker forwards pointers that came from this heap.
            unsafe { BuildTargetBindings.free(ptr) };
        });

        mock
    }

    /// Collects the level and rendered fields of every event emitted on the current thread.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(Level, String)>>>);

    impl<S: Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = RenderedFields::default();
            event.record(&mut fields);

            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), fields.0));
        }
    }

    #[derive(Default)]
    struct RenderedFields(String);

    impl Visit for RenderedFields {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            use std::fmt::Write as _;

            _ = write!(self.0, "{}={:?} ", field.name(), value);
        }
    }

    /// Runs `f` with event capture enabled and returns the rendered events at `level`.
    fn events_at(level: Level, f: impl FnOnce()) -> Vec<String> {
        let events = CapturedEvents::default();
        tracing::subscriber::with_default(Registry::default().with(events.clone()), f);

        let captured = events.0.lock().unwrap();
        captured
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Mock heap whose fresh and resized blocks are entirely filled with `marker`, so that any
    /// byte the tracker writes afterwards is visible.
    fn marked_heap(marker: u8) -> MockBindings {
        let mut mock = MockBindings::new();

        mock.expect_malloc().returning(move |size| {
            let ptr = BuildTargetBindings.malloc(size);
            // SAFETY: The heap just returned `size` bytes.
            unsafe { ptr.write_bytes(marker, size) };
            ptr
        });
        mock.expect_posix_memalign()
            .returning(move |memptr, alignment, size| {
                let result = BuildTargetBindings.posix_memalign(memptr, alignment, size);
                if result == 0 {
                    // SAFETY: On success the heap stored a block of `size` bytes.
                    unsafe { (*memptr).write_bytes(marker, size) };
                }
                result
            });
        mock.expect_realloc().returning(move |ptr, size| {
            // SAFETY: The tracker forwards pointers that came from this heap.
            let new_ptr = unsafe { BuildTargetBindings.realloc(ptr, size) };
            // SAFETY: The heap just returned `size` bytes.
            unsafe { new_ptr.write_bytes(marker, size) };
            new_ptr
        });
        mock.expect_free()
            // SAFETY: The tracker forwards pointers that came from this heap.
            .returning(|ptr| unsafe { BuildTargetBindings.free(ptr) });

        mock
    }

    #[test]
    fn disabled_tracker_tracks_nothing() {
        let tracker = tracker();

        let ptr = tracker.allocate(64);
        assert!(!ptr.is_null());
        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.find(ptr).is_none());

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };

        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn disabled_tracker_does_not_fill() {
        let tracker = tracker();

        let ptr = tracker.allocate_zeroed(1, 32);
        // SAFETY: 32 bytes, zero-initialized by calloc.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 32) };
        assert!(bytes.iter().all(|b| *b == 0));

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };
    }

    #[test]
    fn balanced_epoch_reports_nothing() {
        let tracker = tracker();
        tracker.start();

        let ptrs: Vec<_> = (1..=50).map(|i| tracker.allocate(i * 8)).collect();
        assert_eq!(tracker.live_allocations(), 50);

        for ptr in ptrs {
            // SAFETY: Allocated above.
            unsafe { tracker.release(ptr) };
        }

        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn leaks_are_reported_with_size_and_site() {
        let tracker = tracker();
        tracker.start();

        let site_a = SourceSite::new("a.rs", 1);
        let site_b = SourceSite::new("b.rs", 2);

        let leaked_a = tracker.allocate_at(10, site_a);
        let freed = tracker.allocate_at(20, site_a);
        let leaked_b = tracker.allocate_zeroed_at(3, 10, site_b);

        // SAFETY: Allocated above.
        unsafe { tracker.release(freed) };

        let report = tracker.stop();

        let mut expected = vec![
            AllocationRecord::new(leaked_a.addr(), 10, site_a),
            AllocationRecord::new(leaked_b.addr(), 30, site_b),
        ];
        expected.sort_by_key(AllocationRecord::address);

        assert_eq!(report.leaks(), expected.as_slice());
        assert_eq!(tracker.live_allocations(), 0);

        // SAFETY: Allocated above; the tracker does not free leaked memory.
        unsafe {
            tracker.release(leaked_a);
            tracker.release(leaked_b);
        }
    }

    #[test]
    fn implicit_site_is_the_caller() {
        let tracker = tracker();
        tracker.start();

        let expected_line = line!() + 1;
        let ptr = tracker.allocate(4);

        let record = tracker.find(ptr).unwrap();
        assert_eq!(record.site().file(), file!());
        assert_eq!(record.site().line(), expected_line);

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };
        tracker.stop();
    }

    #[test]
    fn allocation_is_filled_with_sentinel() {
        let tracker = tracker();
        tracker.start();

        let ptr = tracker.allocate(48);
        // SAFETY: The tracker initialized all 48 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 48) };
        assert!(bytes.iter().all(|b| *b == 0xFF));

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };
        tracker.stop();
    }

    #[test]
    fn alloc_fill_can_be_customized() {
        let tracker = LeakTracker::with_options(quiet().alloc_fill(Some(0xA5)));
        tracker.start();

        let ptr = tracker.allocate(16);
        // SAFETY: The tracker initialized all 16 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 16) };
        assert!(bytes.iter().all(|b| *b == 0xA5));

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };
        tracker.stop();
    }

    #[test]
    fn zeroed_allocation_stays_zeroed_while_tracking() {
        let tracker = tracker();
        tracker.start();

        let ptr = tracker.allocate_zeroed(16, 8);
        // SAFETY: 128 bytes, zero-initialized by calloc.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 128) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(tracker.find(ptr).unwrap().size(), 128);

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };
        tracker.stop();
    }

    #[test]
    fn aligned_allocation_is_tracked_and_aligned() {
        let tracker = tracker();
        tracker.start();

        let mut ptr = ptr::null_mut();
        assert_eq!(tracker.allocate_aligned(&mut ptr, 4096, 100), 0);
        assert_eq!(ptr.addr() % 4096, 0);
        assert_eq!(tracker.find(ptr).unwrap().size(), 100);

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn aligned_allocation_failure_status_is_passed_through() {
        let tracker = tracker();
        tracker.start();

        let mut ptr = ptr::null_mut();
        assert_eq!(tracker.allocate_aligned(&mut ptr, 3, 100), libc::EINVAL);
        assert!(ptr.is_null());
        assert_eq!(tracker.live_allocations(), 0);

        tracker.stop();
    }

    #[test]
    fn allocation_failure_creates_no_record() {
        let mut mock = MockBindings::new();
        mock.expect_malloc().returning(|_| ptr::null_mut());
        mock.expect_calloc().returning(|_, _| ptr::null_mut());

        let tracker = LeakTracker::with_bindings(mock.into(), quiet());
        tracker.start();

        assert!(tracker.allocate(100).is_null());
        assert!(tracker.allocate_zeroed(10, 10).is_null());
        assert_eq!(tracker.live_allocations(), 0);

        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn reallocation_keeps_original_site() {
        let tracker = tracker();
        tracker.start();

        let origin = SourceSite::new("origin.rs", 11);
        let mut ptr = tracker.allocate_at(8, origin);

        for size in [64, 4096, 16, 100_000] {
            // SAFETY: `ptr` is live and was allocated by this tracker.
            ptr = unsafe { tracker.reallocate(ptr, size) };
            assert!(!ptr.is_null());
        }

        let report = tracker.stop();
        assert_eq!(
            report.leaks(),
            &[AllocationRecord::new(ptr.addr(), 100_000, origin)]
        );

        // SAFETY: Still live; leaks are not freed by the tracker.
        unsafe { tracker.release(ptr) };
    }

    #[test]
    fn reallocation_preserves_contents_and_fills_growth() {
        let tracker = tracker();
        tracker.start();

        let ptr = tracker.allocate(4);
        // SAFETY: 4 bytes were allocated.
        unsafe { ptr.copy_from_nonoverlapping([1_u8, 2, 3, 4].as_ptr(), 4) };

        // SAFETY: Allocated above.
        let ptr = unsafe { tracker.reallocate(ptr, 8) };
        // SAFETY: 8 bytes: 4 preserved, 4 filled by the tracker.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 8) };
        assert_eq!(bytes, &[1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF]);

        // SAFETY: Live allocation.
        unsafe { tracker.release(ptr) };
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn reallocating_untracked_memory_stays_untracked() {
        let tracker = tracker();

        let ptr = tracker.allocate(16);
        tracker.start();

        // SAFETY: Allocated above.
        let ptr = unsafe { tracker.reallocate(ptr, 32) };
        assert!(!ptr.is_null());
        assert_eq!(tracker.live_allocations(), 0);

        assert!(tracker.stop().is_empty());

        // SAFETY: Live allocation.
        unsafe { tracker.release(ptr) };
    }

    #[test]
    fn failed_reallocation_keeps_record() {
        let mut mock = MockBindings::new();
        mock.expect_malloc()
            .returning(|size| BuildTargetBindings.malloc(size));
        mock.expect_realloc().returning(|_, _| ptr::null_mut());
        mock.expect_free()
            // SAFETY: The tracker forwards pointers that came from this heap.
            .returning(|ptr| unsafe { BuildTargetBindings.free(ptr) });

        let tracker = LeakTracker::with_bindings(mock.into(), quiet());
        tracker.start();

        let ptr = tracker.allocate(16);

        // SAFETY: Allocated above.
        assert!(unsafe { tracker.reallocate(ptr, 1 << 20) }.is_null());
        assert_eq!(tracker.find(ptr).unwrap().size(), 16);

        // SAFETY: Still live because reallocation failed.
        unsafe { tracker.release(ptr) };
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn reallocation_to_zero_that_frees_drops_record() {
        let mut mock = MockBindings::new();
        mock.expect_malloc()
            .returning(|size| BuildTargetBindings.malloc(size));
        mock.expect_realloc().returning(|ptr, _| {
            // SAFETY: The tracker forwards pointers that came from this heap.
            unsafe { BuildTargetBindings.free(ptr) };
            ptr::null_mut()
        });

        let tracker = LeakTracker::with_bindings(mock.into(), quiet());
        tracker.start();

        let ptr = tracker.allocate(16);
        // SAFETY: Allocated above.
        assert!(unsafe { tracker.reallocate(ptr, 0) }.is_null());

        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn release_fills_with_free_sentinel_before_real_free() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_clone = Arc::clone(&observed);

        let heap = observed_heap(move |ptr| {
            // SAFETY: The test allocates exactly 24 bytes, still live until the real free.
            let bytes = unsafe { std::slice::from_raw_parts(ptr, 24) };
            observed_clone.lock().unwrap().extend_from_slice(bytes);
        });

        let tracker = LeakTracker::with_bindings(heap.into(), quiet());
        tracker.start();

        let ptr = tracker.allocate(24);
        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 24);
        assert!(observed.iter().all(|b| *b == 0x11));

        tracker.stop();
    }

    #[test]
    fn release_of_untracked_memory_frees_exactly_once() {
        let mut seq = Sequence::new();
        let mut mock = MockBindings::new();

        mock.expect_malloc()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|size| BuildTargetBindings.malloc(size));
        mock.expect_free()
            .times(1)
            .in_sequence(&mut seq)
            // SAFETY: The tracker forwards pointers that came from this heap.
            .returning(|ptr| unsafe { BuildTargetBindings.free(ptr) });

        let tracker = LeakTracker::with_bindings(
            mock.into(),
            quiet().warn_on_untracked_free(true),
        );

        // Allocated before tracking started.
        let ptr = tracker.allocate(32);
        tracker.start();

        // SAFETY: Allocated above.
        unsafe { tracker.release(ptr) };

        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn release_of_null_is_forwarded() {
        let mut mock = MockBindings::new();
        mock.expect_free()
            .times(1)
            .withf(|ptr| ptr.is_null())
            .return_const(());

        let tracker = LeakTracker::with_bindings(mock.into(), quiet());
        tracker.start();

        // SAFETY: Null is always acceptable.
        unsafe { tracker.release(ptr::null_mut()) };

        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn leaked_memory_is_not_freed_by_stop() {
        let mut mock = MockBindings::new();
        mock.expect_malloc()
            .returning(|size| BuildTargetBindings.malloc(size));
        mock.expect_free().never();

        let tracker = LeakTracker::with_bindings(mock.into(), quiet());
        tracker.start();

        let ptr = tracker.allocate(8);
        assert_eq!(tracker.stop().len(), 1);

        // SAFETY: Leaked allocation from the real heap, released directly.
        unsafe { BuildTargetBindings.free(ptr) };
    }

    #[test]
    fn epochs_are_independent() {
        let tracker = tracker();

        tracker.start();
        let first = tracker.allocate(8);
        assert_eq!(tracker.stop().len(), 1);

        tracker.start();
        assert_eq!(tracker.live_allocations(), 0);

        // Released in the second epoch, but tracked in the first: untracked now.
        // SAFETY: Allocated above.
        unsafe { tracker.release(first) };

        let second = tracker.allocate(8);
        let report = tracker.stop();
        assert_eq!(report.leaks()[0].address(), second.addr());
        assert_eq!(report.len(), 1);

        // SAFETY: Allocated above.
        unsafe { tracker.release(second) };
    }

    #[test]
    fn independent_trackers_do_not_share_state() {
        let a = tracker();
        let b = tracker();
        a.start();

        let ptr = b.allocate(8);
        assert_eq!(a.live_allocations(), 0);
        assert!(!b.is_enabled());

        // SAFETY: Allocated above.
        unsafe { b.release(ptr) };
        assert!(a.stop().is_empty());
    }

    #[test]
    fn disabled_tracker_leaves_aligned_and_resized_memory_alone() {
        let tracker = LeakTracker::with_bindings(marked_heap(0x5A).into(), quiet());

        let mut aligned = ptr::null_mut();
        assert_eq!(tracker.allocate_aligned(&mut aligned, 64, 32), 0);
        // SAFETY: 32 bytes were allocated.
        let bytes = unsafe { std::slice::from_raw_parts(aligned, 32) };
        assert!(bytes.iter().all(|b| *b == 0x5A));

        let small = tracker.allocate(8);
        // SAFETY: Allocated above.
        let grown = unsafe { tracker.reallocate(small, 64) };
        // SAFETY: 64 bytes after reallocation.
        let bytes = unsafe { std::slice::from_raw_parts(grown, 64) };
        assert!(bytes.iter().all(|b| *b == 0x5A));

        assert_eq!(tracker.live_allocations(), 0);

        // SAFETY: Allocated above.
        unsafe {
            tracker.release(aligned);
            tracker.release(grown);
        }
    }

    #[test]
    fn aligned_success_without_block_is_not_tracked() {
        let mut mock = MockBindings::new();
        mock.expect_posix_memalign()
            .times(2)
            .returning(|memptr, _, _| {
                *memptr = ptr::null_mut();
                0
            });

        let tracker = LeakTracker::with_bindings(mock.into(), quiet());
        tracker.start();

        for _ in 0..2 {
            let mut ptr = ptr::null_mut();
            assert_eq!(tracker.allocate_aligned(&mut ptr, 16, 0), 0);
            assert!(ptr.is_null());
        }

        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn double_release_frees_once_per_call_and_warns() {
        let mut heap = MockBindings::new();
        heap.expect_malloc()
            .returning(|size| BuildTargetBindings.malloc(size));

        // The second call must reach the heap too, but must not actually free twice.
        let mut freed = false;
        heap.expect_free().times(2).returning(move |ptr| {
            if !freed {
                freed = true;
                // SAFETY: The first release forwards a live block from this heap.
                unsafe { BuildTargetBindings.free(ptr) };
            }
        });

        let tracker =
            LeakTracker::with_bindings(heap.into(), quiet().warn_on_untracked_free(true));
        tracker.start();

        let ptr = tracker.allocate(16);

        let warnings = events_at(Level::WARN, || {
            // SAFETY: The heap mock ignores the second free.
            unsafe {
                tracker.release(ptr);
                tracker.release_at(ptr, SourceSite::new("again.rs", 9));
            }
        });

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not tracked"));
        assert!(warnings[0].contains("again.rs:9"));

        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn untracked_release_is_silent_by_default() {
        let tracker = tracker();

        let ptr = tracker.allocate(16);
        tracker.start();

        let warnings = events_at(Level::WARN, || {
            // SAFETY: Allocated above.
            unsafe { tracker.release(ptr) };
        });

        assert!(warnings.is_empty());
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn untracked_release_warning_names_release_site() {
        let tracker = LeakTracker::with_options(quiet().warn_on_untracked_free(true));

        let ptr = tracker.allocate(16);
        tracker.start();

        let expected_line = line!() + 3;
        let warnings = events_at(Level::WARN, || {
            // SAFETY: Allocated above.
            unsafe { tracker.release(ptr) };
        });

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains(&format!("{}:{expected_line}", file!())));
        assert!(warnings[0].contains(&format!("address={}", ptr.addr())));

        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn untracked_reallocation_warns_only_when_enabled() {
        for warn in [false, true] {
            let tracker = LeakTracker::with_options(quiet().warn_on_untracked_realloc(warn));

            let ptr = tracker.allocate(16);
            tracker.start();

            let mut resized = ptr::null_mut();
            let warnings = events_at(Level::WARN, || {
                // SAFETY: Allocated above.
                resized = unsafe { tracker.reallocate(ptr, 64) };
            });

            assert_eq!(warnings.len(), usize::from(warn));
            assert!(
                warnings
                    .iter()
                    .all(|w| w.contains(&format!("new_address={}", resized.addr())))
            );
            assert_eq!(tracker.live_allocations(), 0);

            assert!(tracker.stop().is_empty());

            // SAFETY: Live allocation.
            unsafe { tracker.release(resized) };
        }
    }

    #[test]
    fn operations_are_traced() {
        let tracker = tracker();
        tracker.start();

        let origin = SourceSite::new("origin.rs", 3);
        let mut ptr = ptr::null_mut();

        let traces = events_at(Level::TRACE, || {
            let small = tracker.allocate_at(8, origin);
            // SAFETY: Allocated above.
            ptr = unsafe { tracker.reallocate(small, 128) };
            // SAFETY: Allocated above.
            unsafe { tracker.release_at(ptr, SourceSite::new("done.rs", 4)) };
        });

        assert_eq!(traces.len(), 3);
        assert!(traces[0].contains("allocated") && traces[0].contains("origin.rs:3"));
        assert!(traces[1].contains("reallocated") && traces[1].contains("size=128"));
        assert!(traces[2].contains("released") && traces[2].contains("done.rs:4"));

        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn concurrent_pairs_balance() {
        const THREADS: usize = 8;
        const PAIRS: usize = 1_000;

        let tracker = tracker();
        tracker.start();

        thread::scope(|s| {
            for t in 0..THREADS {
                let tracker = &tracker;
                s.spawn(move || {
                    for i in 0..PAIRS {
                        let ptr = tracker.allocate(t + i % 64 + 1);
                        assert!(!ptr.is_null());
                        // SAFETY: Allocated above.
                        let ptr = unsafe { tracker.reallocate(ptr, i % 128 + 1) };
                        // SAFETY: Allocated above.
                        unsafe { tracker.release(ptr) };
                    }
                });
            }
        });

        assert_eq!(tracker.live_allocations(), 0);
        assert!(tracker.stop().is_empty());
    }

    #[test]
    fn concurrent_leaks_are_all_reported() {
        const THREADS: usize = 4;
        const LEAKS: usize = 100;

        let tracker = tracker();
        tracker.start();

        let leaked: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..LEAKS)
                            .map(|_| tracker.allocate(16).expose_provenance())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let report = tracker.stop();
        let mut reported: Vec<usize> = report
            .leaks()
            .iter()
            .map(AllocationRecord::address)
            .collect();
        let mut expected = leaked.clone();
        reported.sort_unstable();
        expected.sort_unstable();

        assert_eq!(reported, expected);

        for address in leaked {
            // SAFETY: Each address is a live allocation from the real heap.
            unsafe { BuildTargetBindings.free(ptr::with_exposed_provenance_mut(address)) };
        }
    }
}
