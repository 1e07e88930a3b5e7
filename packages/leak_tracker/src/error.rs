use thiserror::Error;

use crate::SourceSite;

/// Errors that can occur when maintaining the allocation index.
///
/// None of these are recoverable from the point of view of a tracked program. The tracker
/// surfaces them as a fatal diagnostic followed by a process abort, because continuing would
/// silently corrupt leak accounting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An address was inserted into the index while a record for it was still live.
    ///
    /// This means the heap handed out the same address twice without an intervening tracked
    /// release, which indicates heap corruption or a bookkeeping bug.
    #[error(
        "address {address:#018x} allocated at {new_site} is already tracked as allocated at {existing_site}"
    )]
    DuplicateAddress {
        /// The address that was already present.
        address: usize,

        /// Where the already-indexed allocation was made.
        existing_site: SourceSite,

        /// Where the conflicting allocation was made.
        new_site: SourceSite,
    },
}

/// A specialized `Result` type for index operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
