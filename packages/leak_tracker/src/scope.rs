use std::mem::ManuallyDrop;

use crate::{LeakReport, LeakTracker};

/// A tracking epoch that ends when this value is finished or dropped.
///
/// Created by [`LeakTracker::scope()`]. Dropping the scope stops tracking and discards the
/// report (it is still printed to stderr unless that was disabled via
/// [`Options::print_report_on_stop`](crate::Options::print_report_on_stop)). Use
/// [`finish()`](Self::finish) to inspect the report instead.
#[derive(Debug)]
#[must_use = "tracking stops as soon as the scope is dropped"]
pub struct TrackingScope<'a> {
    tracker: &'a LeakTracker,
}

impl<'a> TrackingScope<'a> {
    pub(crate) fn new(tracker: &'a LeakTracker) -> Self {
        tracker.start();

        Self { tracker }
    }

    /// Stops tracking and returns the leaks of this epoch.
    pub fn finish(self) -> LeakReport {
        let this = ManuallyDrop::new(self);
        this.tracker.stop()
    }
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        _ = self.tracker.stop();
    }
}
