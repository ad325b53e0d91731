//! Per-call receive loop and callback delivery.
//!
//! Each started call gets one task that owns the inbound stream. Because a single task invokes
//! every callback for its call, callbacks for one handle never overlap, while calls on different
//! handles run on whichever runtime workers are free.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::OwnedBuffer;
use crate::codec::{self, MalformedRecord};
use crate::error::ErrorCode;
use crate::handle::CallHandle;
use crate::registry::{CallEntry, CallRegistry};
use crate::transport::InboundStream;

/// Receives the asynchronous side of a call.
///
/// Both methods run on runtime worker threads, never on the thread that called
/// [`Bridge::start`](crate::Bridge::start). The handle is passed to every invocation so one
/// observer can serve several calls and cross-check attribution.
pub trait CallObserver: Send + Sync + 'static {
    /// One inbound message, in transport receive order.
    ///
    /// A message that failed to decode arrives as `Err` and the call continues.
    fn on_response(&self, handle: CallHandle, message: Result<OwnedBuffer, MalformedRecord>);

    /// The single terminal notification. No `on_response` follows it, and the handle is retired
    /// once this returns.
    fn on_done(&self, handle: CallHandle, code: ErrorCode);
}

/// Launch the receive loop for a freshly registered call.
pub(crate) fn spawn(
    runtime: &Handle,
    registry: Arc<CallRegistry>,
    handle: CallHandle,
    entry: Arc<CallEntry>,
    inbound: InboundStream,
    observer: Arc<dyn CallObserver>,
) -> JoinHandle<()> {
    runtime.spawn(run(registry, handle, entry, inbound, observer))
}

async fn run(
    registry: Arc<CallRegistry>,
    handle: CallHandle,
    entry: Arc<CallEntry>,
    mut inbound: InboundStream,
    observer: Arc<dyn CallObserver>,
) {
    let variant = entry.variant();
    let mut delivered: u64 = 0;

    let code = loop {
        match inbound.next().await {
            Some(Ok(raw)) => {
                let message = codec::decode_inbound(variant, raw)
                    .map(|inbound| OwnedBuffer::new(handle, inbound));
                if let Err(e) = &message {
                    warn!(handle = %handle, error = %e, "Inbound record failed to decode");
                }

                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| observer.on_response(handle, message)));
                if outcome.is_err() {
                    error!(handle = %handle, "Response callback panicked, ending call");
                    break ErrorCode::InternalError;
                }

                delivered += 1;
                debug!(handle = %handle, delivered, "Response delivered");
            }
            Some(Err(status)) => {
                let code = ErrorCode::from_status(&status);
                warn!(handle = %handle, status = %status, code = %code, "Stream ended with error");
                break code;
            }
            None => break ErrorCode::Ok,
        }
    };

    // Tear down the remote side before reporting completion.
    drop(inbound);

    if entry.finish(code) {
        let sent = entry.admitted_sends();
        info!(handle = %handle, code = %code, sent, delivered, "Call complete");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_done(handle, code)));
        if outcome.is_err() {
            error!(handle = %handle, "Done callback panicked");
        }
    }

    if registry.retire(handle).is_err() {
        warn!(handle = %handle, "Call was already retired");
    }
}
