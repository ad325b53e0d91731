use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tonic::Status;
use tracing::debug;

use crate::codec::Variant;
use crate::error::{BridgeError, ErrorCode};
use crate::handle::CallHandle;
use crate::registry::error::UnknownHandle;
use crate::state_machine::StateMachine;
use crate::state_machine::lifecycle::{
    LifecycleInput, LifecycleMachine, LifecycleOutput, StreamState,
};

/// Per-call state held by the [`CallRegistry`](super::CallRegistry).
///
/// The lifecycle machine and the outbound queue sit behind one lock, so admitting a send and
/// closing the outbound half are ordered against each other: a send that wins the lock is queued
/// ahead of the end-of-stream, a send that loses it is rejected.
pub struct CallEntry {
    variant: Variant,
    inner: Mutex<EntryInner>,
}

struct EntryInner {
    lifecycle: LifecycleMachine,
    outbound: Option<UnboundedSender<Bytes>>,
}

impl std::fmt::Debug for CallEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEntry")
            .field("variant", &self.variant)
            .field("state", &self.state())
            .finish()
    }
}

impl CallEntry {
    pub fn new(variant: Variant, outbound: UnboundedSender<Bytes>) -> Self {
        Self {
            variant,
            inner: Mutex::new(EntryInner {
                lifecycle: LifecycleMachine::new(),
                outbound: Some(outbound),
            }),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn state(&self) -> StreamState {
        self.lock().lifecycle.state()
    }

    /// Sends the lifecycle admitted onto the outbound queue.
    pub fn admitted_sends(&self) -> u64 {
        self.lock().lifecycle.admitted_sends()
    }

    /// Queue an encoded transmission behind every send admitted before it.
    pub fn send(&self, handle: CallHandle, frame: Bytes) -> Result<(), BridgeError> {
        let mut inner = self.lock();

        match apply(&mut inner.lifecycle, LifecycleInput::Send) {
            Some(LifecycleOutput::Admitted) => {
                let outbound = inner.outbound.as_ref().ok_or_else(|| {
                    BridgeError::Transport(Status::internal("outbound half already released"))
                })?;
                outbound.send(frame).map_err(|_| {
                    BridgeError::Transport(Status::unavailable("transport dropped outbound half"))
                })?;
                debug!(handle = %handle, "Send admitted");
                Ok(())
            }
            Some(LifecycleOutput::Rejected(code)) => Err(rejection(handle, code)),
            _ => Err(BridgeError::Transport(Status::internal(
                "lifecycle produced no verdict for send",
            ))),
        }
    }

    /// End the outbound half. The transport sees end-of-stream once every admitted send has
    /// been drained.
    pub fn close_send(&self, handle: CallHandle) -> Result<(), BridgeError> {
        let mut inner = self.lock();

        match apply(&mut inner.lifecycle, LifecycleInput::CloseSend) {
            Some(LifecycleOutput::Admitted) => {
                inner.outbound = None;
                debug!(handle = %handle, "Outbound half closed");
                Ok(())
            }
            Some(LifecycleOutput::Rejected(code)) => Err(rejection(handle, code)),
            _ => Err(BridgeError::Transport(Status::internal(
                "lifecycle produced no verdict for close-send",
            ))),
        }
    }

    /// Move the call to its terminal state.
    ///
    /// Returns `true` only for the call that performed the transition; the caller that sees
    /// `true` owns delivery of the terminal callback.
    pub fn finish(&self, code: ErrorCode) -> bool {
        let mut inner = self.lock();
        inner.outbound = None;
        matches!(
            apply(&mut inner.lifecycle, LifecycleInput::Finish(code)),
            Some(LifecycleOutput::Finished(_))
        )
    }

    fn lock(&self) -> MutexGuard<'_, EntryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply(machine: &mut LifecycleMachine, input: LifecycleInput) -> Option<LifecycleOutput> {
    machine.process_input(input);
    machine.poll_output()
}

fn rejection(handle: CallHandle, code: ErrorCode) -> BridgeError {
    match code {
        ErrorCode::SendAfterClose => BridgeError::SendAfterClose { handle },
        ErrorCode::AlreadyClosed => BridgeError::AlreadyClosed { handle },
        _ => BridgeError::UnknownHandle(UnknownHandle {
            handle: handle.get(),
        }),
    }
}
