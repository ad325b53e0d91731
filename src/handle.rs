use std::fmt::Display;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque identifier naming one in-flight bidirectional stream.
///
/// Handles are never zero, so `0` can be used by native callers as "no handle".
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CallHandle(NonZeroU64);

impl CallHandle {
    /// Rebuild a handle from its raw value, returning `None` for zero.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw value handed across the C boundary.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Display for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Issues call handles from a monotonic counter.
///
/// A 64-bit counter does not wrap in practice, so handles are never reused for the lifetime of
/// the allocator.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> CallHandle {
        loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            if let Some(handle) = CallHandle::from_raw(raw) {
                return handle;
            }
        }
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
