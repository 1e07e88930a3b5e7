//! Ordered index of live tracked allocations, keyed by address.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::SourceSite;
use crate::error::{Error, Result};

/// One live allocation made while tracking was enabled.
///
/// Records are owned by the tracker. Callers only ever observe copies, for example through
/// [`LeakTracker::find()`](crate::LeakTracker::find) or as entries of a
/// [`LeakReport`](crate::LeakReport).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocationRecord {
    address: usize,
    size: usize,
    site: SourceSite,
}

impl AllocationRecord {
    #[must_use]
    pub(crate) const fn new(address: usize, size: usize, site: SourceSite) -> Self {
        Self {
            address,
            size,
            site,
        }
    }

    /// The address returned by the heap.
    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    /// The size in bytes that was requested, as adjusted by any reallocation.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Where the allocation was originally made.
    #[must_use]
    pub const fn site(&self) -> SourceSite {
        self.site
    }
}

/// The set of live tracked allocations, unique by address.
///
/// Backed by a B-tree so insert, lookup and removal are all logarithmic in the number of live
/// allocations. The index performs no synchronization of its own; it is only ever accessed with
/// the tracking state lock held.
#[derive(Debug, Default)]
pub(crate) struct AllocationIndex {
    records: BTreeMap<usize, AllocationRecord>,
}

impl AllocationIndex {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Adds a record, failing if its address is already present.
    pub(crate) fn insert(&mut self, record: AllocationRecord) -> Result<()> {
        match self.records.entry(record.address) {
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
            Entry::Occupied(entry) => Err(Error::DuplicateAddress {
                address: record.address,
                existing_site: entry.get().site,
                new_site: record.site,
            }),
        }
    }

    #[must_use]
    pub(crate) fn find(&self, address: usize) -> Option<&AllocationRecord> {
        self.records.get(&address)
    }

    pub(crate) fn remove(&mut self, address: usize) -> Option<AllocationRecord> {
        self.records.remove(&address)
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Empties the index, returning every record in ascending address order.
    pub(crate) fn drain(&mut self) -> Vec<AllocationRecord> {
        let records = std::mem::take(&mut self.records);
        records.into_values().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }
}
