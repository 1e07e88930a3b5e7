//! Enable flag, allocation index and the lock that guards both.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use crate::constants::ERR_POISONED_LOCK;
use crate::index::{AllocationIndex, AllocationRecord};

thread_local! {
    // Set while the current thread is inside a locked bookkeeping section. Bookkeeping allocates
    // (index nodes, drained record vectors) and when the tracker is the global allocator those
    // allocations come straight back into the tracker. Nested calls observe this flag and go
    // directly to the real heap without touching the lock, which would otherwise deadlock.
    //
    // A const-initialized `Cell<bool>` has no destructor, so it stays accessible even while the
    // thread is tearing down its other thread-local values.
    static IN_BOOKKEEPING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as being inside bookkeeping for as long as it is alive.
#[derive(Debug)]
pub(crate) struct BookkeepingScope {
    // The flag is per-thread, so the scope must be dropped on the thread that created it.
    _not_send: PhantomData<*const ()>,
}

impl BookkeepingScope {
    /// Enters bookkeeping, or returns `None` if the current thread is already inside it.
    pub(crate) fn enter() -> Option<Self> {
        let already_inside = IN_BOOKKEEPING
            .try_with(|flag| flag.replace(true))
            .unwrap_or(true);

        if already_inside {
            None
        } else {
            Some(Self {
                _not_send: PhantomData,
            })
        }
    }

    #[cfg(test)]
    pub(crate) fn is_active() -> bool {
        IN_BOOKKEEPING.with(Cell::get)
    }
}

impl Drop for BookkeepingScope {
    fn drop(&mut self) {
        _ = IN_BOOKKEEPING.try_with(|flag| flag.set(false));
    }
}

/// The data guarded by the tracking lock.
#[derive(Debug)]
pub(crate) struct Epoch {
    pub(crate) enabled: bool,
    pub(crate) index: AllocationIndex,

    // Incremented by every `start()`, only used to correlate log messages.
    pub(crate) number: u64,
}

/// Process-lifetime tracking state: a flag and an index behind a single lock.
#[derive(Debug)]
pub(crate) struct TrackingState {
    epoch: Mutex<Epoch>,
}

impl TrackingState {
    pub(crate) const fn new() -> Self {
        Self {
            epoch: Mutex::new(Epoch {
                enabled: false,
                index: AllocationIndex::new(),
                number: 0,
            }),
        }
    }

    /// Acquires the lock for an instrumented heap call.
    ///
    /// Returns `None` if the current thread is already inside bookkeeping, in which case the
    /// caller must bypass tracking entirely and talk to the real heap.
    pub(crate) fn lock(&self) -> Option<LockedState<'_>> {
        let scope = BookkeepingScope::enter()?;

        Some(LockedState {
            epoch: self.epoch.lock().expect(ERR_POISONED_LOCK),
            _scope: Some(scope),
        })
    }

    /// Acquires the lock for a lifecycle transition or an inspection call.
    ///
    /// These are never issued by the tracker's own bookkeeping, so they always take the lock.
    pub(crate) fn lock_always(&self) -> LockedState<'_> {
        let scope = BookkeepingScope::enter();

        LockedState {
            epoch: self.epoch.lock().expect(ERR_POISONED_LOCK),
            _scope: scope,
        }
    }

    /// Begins a new epoch, returning the epoch number and any records left over from a previous
    /// epoch that were discarded.
    pub(crate) fn start(&self) -> (u64, usize) {
        let mut state = self.lock_always();

        let stale = state.index.len();
        state.index.clear();
        state.number = state.number.wrapping_add(1);
        state.enabled = true;

        (state.number, stale)
    }

    /// Ends the current epoch, returning the epoch number and every record that was still live.
    ///
    /// The flag is cleared before the index is drained, under the same lock acquisition, so no
    /// concurrent tracked call can add to or remove from the index in between.
    pub(crate) fn stop(&self) -> (u64, Vec<AllocationRecord>) {
        let mut state = self.lock_always();

        state.enabled = false;
        let leaks = state.index.drain();

        (state.number, leaks)
    }
}

/// Holds the tracking lock and keeps the current thread marked as inside bookkeeping.
#[derive(Debug)]
pub(crate) struct LockedState<'a> {
    // Declared first so the lock is released before the bookkeeping mark is cleared.
    epoch: MutexGuard<'a, Epoch>,
    _scope: Option<BookkeepingScope>,
}

impl LockedState<'_> {
    /// Releases the lock but keeps the current thread inside bookkeeping until the returned
    /// scope is dropped.
    ///
    /// Diagnostics are emitted this way: other threads can make progress, while any allocation
    /// made by a tracing subscriber on this thread bypasses tracking instead of recursing into
    /// another diagnostic.
    pub(crate) fn unlock(self) -> Option<BookkeepingScope> {
        let Self { epoch, _scope } = self;
        drop(epoch);
        _scope
    }
}

impl Deref for LockedState<'_> {
    type Target = Epoch;

    fn deref(&self) -> &Self::Target {
        &self.epoch
    }
}

impl DerefMut for LockedState<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.epoch
    }
}
