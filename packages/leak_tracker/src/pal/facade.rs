use std::fmt::{self, Debug};
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockBindings;
use crate::pal::{Bindings, BuildTargetBindings};

#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Real(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn real() -> Self {
        Self::Real(&BuildTargetBindings)
    }
}

impl Bindings for BindingsFacade {
    fn malloc(&self, size: usize) -> *mut u8 {
        match self {
            Self::Real(bindings) => bindings.malloc(size),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.malloc(size),
        }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        match self {
            Self::Real(bindings) => bindings.calloc(count, size),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.calloc(count, size),
        }
    }

    fn posix_memalign(&self, memptr: &mut *mut u8, alignment: usize, size: usize) -> i32 {
        match self {
            Self::Real(bindings) => bindings.posix_memalign(memptr, alignment, size),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.posix_memalign(memptr, alignment, size),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        match self {
            // SAFETY: Forwarding the caller's guarantees.
            Self::Real(bindings) => unsafe { bindings.realloc(ptr, size) },
            #[cfg(test)]
            // SAFETY: Forwarding the caller's guarantees.
            Self::Mock(bindings) => unsafe { bindings.realloc(ptr, size) },
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        match self {
            // SAFETY: Forwarding the caller's guarantees.
            Self::Real(bindings) => unsafe { bindings.free(ptr) },
            #[cfg(test)]
            // SAFETY: Forwarding the caller's guarantees.
            Self::Mock(bindings) => unsafe { bindings.free(ptr) },
        }
    }
}

impl From<&'static BuildTargetBindings> for BindingsFacade {
    fn from(bindings: &'static BuildTargetBindings) -> Self {
        Self::Real(bindings)
    }
}

#[cfg(test)]
impl From<MockBindings> for BindingsFacade {
    fn from(bindings: MockBindings) -> Self {
        Self::Mock(Arc::new(bindings))
    }
}

impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(bindings) => bindings.fmt(f),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.fmt(f),
        }
    }
}
