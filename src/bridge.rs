use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use crate::codec::{NativeFrame, Variant};
use crate::config::BridgeConfig;
use crate::dispatch::{self, CallObserver};
use crate::error::BridgeError;
use crate::handle::CallHandle;
use crate::registry::{CallEntry, CallRegistry};
use crate::transport::StreamTransport;

/// Drives bidirectional-streaming calls on behalf of a caller that only deals in handles.
///
/// [`start`](Bridge::start) opens a call and launches its receive loop on `runtime`.
/// [`send`](Bridge::send), [`send_native`](Bridge::send_native) and
/// [`close_send`](Bridge::close_send) are synchronous admission calls: they queue work for the
/// transport and return without waiting for the remote.
pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<CallRegistry>,
    transport: Arc<dyn StreamTransport>,
    runtime: Handle,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    pub fn new(config: BridgeConfig, transport: Arc<dyn StreamTransport>, runtime: Handle) -> Self {
        Self {
            config,
            registry: Arc::new(CallRegistry::new()),
            transport,
            runtime,
        }
    }

    /// Open a call and begin delivering its responses to `observer`.
    ///
    /// # Errors
    ///
    /// Fails with an error whose [`code`](BridgeError::code) is `InitError` if the session
    /// cannot be established; no callback is ever invoked for a failed start.
    pub async fn start(
        &self,
        variant: Variant,
        observer: Arc<dyn CallObserver>,
    ) -> Result<CallHandle, BridgeError> {
        let route = self.config.route();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let outbound = UnboundedReceiverStream::new(outbound_rx).boxed();

        let inbound =
            tokio::time::timeout(self.config.open_timeout, self.transport.open(&route, outbound))
                .await??;

        let (handle, entry) = self
            .registry
            .register(CallEntry::new(variant, outbound_tx));

        info!(
            handle = %handle,
            variant = ?variant,
            path = %route.grpc_path(),
            "Call started"
        );

        dispatch::spawn(
            &self.runtime,
            Arc::clone(&self.registry),
            handle,
            entry,
            inbound,
            observer,
        );

        Ok(handle)
    }

    /// Queue an encoded stream record on a framed call.
    pub fn send(&self, handle: CallHandle, record: &[u8]) -> Result<(), BridgeError> {
        let entry = self.registry.get(handle)?;
        expect_variant(&entry, Variant::Framed)?;
        entry.send(handle, Bytes::copy_from_slice(record))
    }

    /// Queue raw payload bytes and a sequence number on a native call.
    pub fn send_native(
        &self,
        handle: CallHandle,
        payload: &[u8],
        sequence: i32,
    ) -> Result<(), BridgeError> {
        let entry = self.registry.get(handle)?;
        expect_variant(&entry, Variant::Native)?;

        let frame = NativeFrame {
            payload: Bytes::copy_from_slice(payload),
            sequence,
        };
        entry.send(handle, frame.encode())
    }

    /// End the outbound half of a call. Responses keep arriving until the remote finishes.
    pub fn close_send(&self, handle: CallHandle) -> Result<(), BridgeError> {
        self.registry.get(handle)?.close_send(handle)
    }

    /// Number of calls whose terminal callback has not yet returned.
    pub fn live_calls(&self) -> usize {
        self.registry.len()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

fn expect_variant(entry: &CallEntry, expected: Variant) -> Result<(), BridgeError> {
    if entry.variant() == expected {
        Ok(())
    } else {
        Err(BridgeError::InvalidArgument(
            "operation does not match the call's variant",
        ))
    }
}
