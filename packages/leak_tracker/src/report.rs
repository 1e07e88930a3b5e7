//! Leak reports produced at the end of a tracking epoch.

use std::fmt;
use std::io::{self, Write};

use crate::AllocationRecord;

/// The allocations that were still live when tracking stopped.
///
/// Produced by [`LeakTracker::stop()`](crate::LeakTracker::stop). Leaks are listed in ascending
/// address order, each exactly once, with the size and site recorded at allocation time.
///
/// The textual form has one line per leak followed by a total, and is empty if nothing leaked:
///
/// ```text
/// address 0x000055d0c2a1b2c0 (allocated at src/parser.rs:42, size 128) is not freed
/// address 0x000055d0c2a1b400 (allocated at src/cache.rs:17, size 16) is not freed
/// total 2 objects
/// ```
///
/// # Examples
///
/// ```
/// use leak_tracker::LeakTracker;
///
/// let tracker = LeakTracker::new();
/// tracker.start();
///
/// let _forgotten = tracker.allocate(64);
///
/// let report = tracker.stop();
/// assert_eq!(report.len(), 1);
/// assert_eq!(report.total_bytes(), 64);
///
/// for leak in report.leaks() {
///     println!("{} bytes leaked at {}", leak.size(), leak.site());
/// }
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LeakReport {
    leaks: Vec<AllocationRecord>,
}

impl LeakReport {
    #[must_use]
    pub(crate) fn new(leaks: Vec<AllocationRecord>) -> Self {
        Self { leaks }
    }

    /// The leaked allocations in ascending address order.
    #[must_use]
    pub fn leaks(&self) -> &[AllocationRecord] {
        &self.leaks
    }

    /// The number of leaked allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaks.len()
    }

    /// Whether nothing leaked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaks.is_empty()
    }

    /// The sum of the sizes of all leaked allocations.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.leaks
            .iter()
            .map(AllocationRecord::size)
            .fold(0, usize::saturating_add)
    }

    /// Writes the report to `out`, one line per leak followed by the total.
    ///
    /// Writes nothing if the report is empty.
    ///
    /// # Errors
    ///
    /// Returns any error reported by `out`.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        write!(out, "{self}")
    }

    /// Prints the report to stderr.
    ///
    /// Prints nothing if the report is empty, not even an empty line.
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stderr output reliably - manually tested.
    pub fn print_to_stderr(&self) {
        // A failure to write diagnostics has nowhere better to be reported.
        _ = self.write_to(&mut io::stderr().lock());
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for leak in &self.leaks {
            writeln!(
                f,
                "address {:#018x} (allocated at {}, size {}) is not freed",
                leak.address(),
                leak.site(),
                leak.size()
            )?;
        }

        if !self.leaks.is_empty() {
            writeln!(f, "total {} objects", self.leaks.len())?;
        }

        Ok(())
    }
}
