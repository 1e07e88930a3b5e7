//! Demonstrates leak detection, attribution through reallocation and the use-after-free fill.
//!
//! Run with `cargo run --example leak_tracker_basic` and look at stderr for the leak report.

use leak_tracker::{DEFAULT_FREE_FILL, LeakTracker, site};

fn main() {
    let tracker = LeakTracker::new();
    tracker.start();

    // Released properly, never reported.
    let scratch = tracker.allocate(64);
    // SAFETY: Allocated above by the same tracker.
    unsafe { tracker.release_at(scratch, site!()) };

    // Allocated here, resized twice elsewhere, but reported at this line.
    let growing = tracker.allocate_at(16, site!());
    let growing = grow(&tracker, growing);

    // Zeroed memory stays zeroed even while tracking.
    let zeroed = tracker.allocate_zeroed(8, 8);
    // SAFETY: 64 bytes were allocated and zero-initialized.
    let zero_bytes = unsafe { std::slice::from_raw_parts(zeroed, 64) };
    println!("zeroed block is all zero: {}", zero_bytes.iter().all(|b| *b == 0));

    let report = tracker.stop();
    println!(
        "{} allocations ({} bytes) were never released",
        report.len(),
        report.total_bytes()
    );
    println!("released memory would have read as {DEFAULT_FREE_FILL:#04x}");

    // SAFETY: Both allocations are still live, the tracker never frees leaked memory.
    unsafe {
        tracker.release(growing);
        tracker.release(zeroed);
    }
}

fn grow(tracker: &LeakTracker, ptr: *mut u8) -> *mut u8 {
    // SAFETY: `ptr` is a live allocation made by `tracker`.
    let ptr = unsafe { tracker.reallocate(ptr, 256) };
    // SAFETY: `ptr` is a live allocation made by `tracker`.
    unsafe { tracker.reallocate(ptr, 4096) }
}
