//! Ownership of delivered buffers.
//!
//! Rust receivers get an [`OwnedBuffer`]: the buffer belongs to them, and releasing it consumes
//! the value, so it cannot be released twice. Native receivers get a raw pointer plus the
//! release function; the [`ReleaseLedger`] keeps every lent allocation alive until that function
//! is called for its pointer.

use std::ffi::c_void;
use std::ops::Deref;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{trace, warn};

use crate::codec::Inbound;
use crate::handle::CallHandle;

/// A delivered payload whose ownership has moved to the receiver.
#[derive(Debug)]
pub struct OwnedBuffer {
    handle: CallHandle,
    payload: Bytes,
    sequence: Option<i32>,
}

impl OwnedBuffer {
    pub(crate) fn new(handle: CallHandle, inbound: Inbound) -> Self {
        Self {
            handle,
            payload: inbound.payload,
            sequence: inbound.sequence,
        }
    }

    /// The call this buffer was delivered on.
    pub fn handle(&self) -> CallHandle {
        self.handle
    }

    /// The remote's sequence number; present only on native calls.
    pub fn sequence(&self) -> Option<i32> {
        self.sequence
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload out as a shared buffer, ending the receiver's release obligation.
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }

    /// Give the buffer back.
    pub fn release(self) {
        trace!(handle = %self.handle, len = self.payload.len(), "Buffer released");
    }
}

impl Deref for OwnedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.payload
    }
}

impl AsRef<[u8]> for OwnedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

/// Tracks buffers lent across the C boundary until their release capability is invoked.
#[derive(Debug, Default)]
pub struct ReleaseLedger {
    outstanding: DashMap<usize, Box<[u8]>, ahash::RandomState>,
}

impl ReleaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `payload` into a stable heap allocation and record it as lent.
    ///
    /// Empty payloads are not lent: they come back as `None` and the receiver gets a null
    /// pointer with no release capability.
    pub fn lend(&self, payload: impl Into<Vec<u8>>) -> Option<(*mut u8, usize)> {
        let mut boxed = payload.into().into_boxed_slice();
        if boxed.is_empty() {
            return None;
        }

        let ptr = boxed.as_mut_ptr();
        let len = boxed.len();
        self.outstanding.insert(ptr as usize, boxed);
        Some((ptr, len))
    }

    /// Free the allocation lent at `ptr`.
    ///
    /// Returns `false` when `ptr` is not outstanding: never lent, or already released.
    pub fn release(&self, ptr: *mut c_void) -> bool {
        match self.outstanding.remove(&(ptr as usize)) {
            Some(_) => true,
            None => {
                warn!(ptr = ?ptr, "Release of a buffer that is not outstanding");
                false
            }
        }
    }

    /// Number of buffers lent and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> CallHandle {
        CallHandle::from_raw(5).unwrap()
    }

    #[test]
    fn test_owned_buffer_views() {
        let buffer = OwnedBuffer::new(
            handle(),
            Inbound {
                payload: Bytes::from_static(b"echo:X"),
                sequence: Some(0),
            },
        );

        assert_eq!(buffer.handle(), handle());
        assert_eq!(buffer.sequence(), Some(0));
        assert_eq!(&buffer[..], b"echo:X");
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.into_bytes(), Bytes::from_static(b"echo:X"));
    }

    #[test]
    fn test_lent_buffer_stays_valid_until_released() {
        let ledger = ReleaseLedger::new();

        let (ptr, len) = ledger.lend(b"payload".to_vec()).unwrap();
        assert_eq!(ledger.outstanding(), 1);

        let view = unsafe { std::slice::from_raw_parts(ptr, len) };
        assert_eq!(view, b"payload");

        assert!(ledger.release(ptr.cast()));
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_second_release_is_refused() {
        let ledger = ReleaseLedger::new();
        let (ptr, _) = ledger.lend(b"once".to_vec()).unwrap();

        assert!(ledger.release(ptr.cast()));
        assert!(!ledger.release(ptr.cast()));
    }

    #[test]
    fn test_foreign_pointer_is_refused() {
        let ledger = ReleaseLedger::new();
        let mut local = [0u8; 4];

        assert!(!ledger.release(local.as_mut_ptr().cast()));
    }

    #[test]
    fn test_empty_payload_is_not_lent() {
        let ledger = ReleaseLedger::new();

        assert!(ledger.lend(Vec::new()).is_none());
        assert_eq!(ledger.outstanding(), 0);
    }
}
