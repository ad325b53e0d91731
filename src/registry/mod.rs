use std::sync::Arc;

use dashmap::{DashMap, Entry};

use self::error::UnknownHandle;
use crate::handle::{CallHandle, HandleAllocator};

pub use self::entry::CallEntry;

mod entry;
pub mod error;

/// The live calls, keyed by their [`CallHandle`].
///
/// Entries are inserted by start and removed by the dispatcher once the terminal callback has
/// returned. Lookups hand out shared references so a send never holds a map shard lock while
/// touching the entry.
#[derive(Debug)]
pub struct CallRegistry {
    calls: DashMap<CallHandle, Arc<CallEntry>, ahash::RandomState>,
    allocator: HandleAllocator,
}

impl CallRegistry {
    /// Construct a new empty [`CallRegistry`].
    pub fn new() -> CallRegistry {
        Self::default()
    }

    /// Allocate a fresh handle for `entry` and make it live.
    pub fn register(&self, entry: CallEntry) -> (CallHandle, Arc<CallEntry>) {
        let entry = Arc::new(entry);
        loop {
            let handle = self.allocator.allocate();
            match self.calls.entry(handle) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&entry));
                    return (handle, entry);
                }
            }
        }
    }

    /// Look up the live call for `handle`.
    pub fn get(&self, handle: CallHandle) -> Result<Arc<CallEntry>, UnknownHandle> {
        self.calls
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(UnknownHandle {
                handle: handle.get(),
            })
    }

    /// Look up a call by the raw value a native caller passed in.
    pub fn get_raw(&self, raw: u64) -> Result<(CallHandle, Arc<CallEntry>), UnknownHandle> {
        let handle = CallHandle::from_raw(raw).ok_or(UnknownHandle { handle: raw })?;
        Ok((handle, self.get(handle)?))
    }

    /// Remove the call for `handle`, after which every lookup fails.
    pub fn retire(&self, handle: CallHandle) -> Result<Arc<CallEntry>, UnknownHandle> {
        self.calls
            .remove(&handle)
            .map(|(_, entry)| entry)
            .ok_or(UnknownHandle {
                handle: handle.get(),
            })
    }

    pub fn contains(&self, handle: CallHandle) -> bool {
        self.calls.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self {
            calls: DashMap::default(),
            allocator: HandleAllocator::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Variant;
    use tokio::sync::mpsc;

    fn entry() -> CallEntry {
        let (tx, _rx) = mpsc::unbounded_channel();
        CallEntry::new(Variant::Framed, tx)
    }

    #[test]
    fn test_register_and_get() {
        let registry = CallRegistry::new();

        let (handle, _) = registry.register(entry());

        assert!(registry.get(handle).is_ok());
        assert!(registry.contains(handle));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_handles_are_distinct() {
        let registry = CallRegistry::new();

        let (first, _) = registry.register(entry());
        let (second, _) = registry.register(entry());

        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_retire_makes_handle_unknown() {
        let registry = CallRegistry::new();
        let (handle, _) = registry.register(entry());

        registry.retire(handle).unwrap();

        assert!(!registry.contains(handle));
        assert!(matches!(registry.get(handle), Err(UnknownHandle { .. })));
        assert!(registry.retire(handle).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_never_issued_raw_handles() {
        let registry = CallRegistry::new();
        registry.register(entry());

        let err = registry.get_raw(0).unwrap_err();
        assert_eq!(err.handle, 0);
        assert!(registry.get_raw(9_999).is_err());
    }

    #[test]
    fn test_retired_handle_is_not_reissued() {
        let registry = CallRegistry::new();
        let (first, _) = registry.register(entry());
        registry.retire(first).unwrap();

        let (second, _) = registry.register(entry());
        assert_ne!(first, second);
    }
}
