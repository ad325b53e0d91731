use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use tonic::Status;
use tracing::{debug, info};

use super::error::{EmptyServiceName, ServiceNotRegistered};
use super::{InboundStream, OutboundStream, Route, StreamTransport};
use crate::error::BridgeError;
use crate::protocol::{Protocol, ProtocolSelection};

/// An in-process implementation of a bidirectional-streaming method.
///
/// The handler receives the caller's records and returns the stream of replies. Returning
/// `Err` refuses the call before any message flows.
pub trait BidiHandler: Send + Sync + 'static {
    fn call(&self, requests: OutboundStream) -> Result<InboundStream, Status>;
}

impl<F> BidiHandler for F
where
    F: Fn(OutboundStream) -> Result<InboundStream, Status> + Send + Sync + 'static,
{
    fn call(&self, requests: OutboundStream) -> Result<InboundStream, Status> {
        self(requests)
    }
}

/// Handlers registered per (protocol, service name).
///
/// Registering again for the same slot replaces the previous handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<(Protocol, String), Arc<dyn BidiHandler>, ahash::RandomState>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("slots", &self.handlers.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `service` under `protocol`.
    ///
    /// Returns `true` if an existing handler was replaced.
    pub fn register(
        &self,
        protocol: Protocol,
        service: impl Into<String>,
        handler: impl BidiHandler,
    ) -> Result<bool, EmptyServiceName> {
        let service = service.into();
        if service.is_empty() {
            return Err(EmptyServiceName);
        }

        info!(protocol = %protocol, service = %service, "Registered stream handler");
        let replaced = self
            .handlers
            .insert((protocol, service), Arc::new(handler))
            .is_some();
        Ok(replaced)
    }

    pub fn lookup(&self, protocol: Protocol, service: &str) -> Option<Arc<dyn BidiHandler>> {
        self.handlers
            .get(&(protocol, service.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Find the handler a call should use under `selection`.
    ///
    /// An explicit protocol only ever consults its own slot. An unset selection tries each
    /// protocol in [`ProtocolSelection::candidates`] order.
    pub fn resolve(
        &self,
        selection: ProtocolSelection,
        service: &str,
    ) -> Result<(Protocol, Arc<dyn BidiHandler>), ServiceNotRegistered> {
        selection
            .candidates()
            .iter()
            .find_map(|&protocol| self.lookup(protocol, service).map(|h| (protocol, h)))
            .ok_or_else(|| ServiceNotRegistered {
                service: service.to_string(),
                protocol: selection,
            })
    }

    /// Service names registered under `protocol`, sorted.
    pub fn services(&self, protocol: Protocol) -> Vec<String> {
        let mut services: Vec<String> = self
            .handlers
            .iter()
            .filter(|entry| entry.key().0 == protocol)
            .map(|entry| entry.key().1.clone())
            .collect();
        services.sort();
        services
    }
}

/// Routes calls to handlers living in the same process.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    handlers: Arc<HandlerRegistry>,
}

impl LocalTransport {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}

impl StreamTransport for LocalTransport {
    fn open(
        &self,
        route: &Route,
        outbound: OutboundStream,
    ) -> BoxFuture<'static, Result<InboundStream, BridgeError>> {
        let opened = self
            .handlers
            .resolve(route.protocol, &route.service)
            .map_err(BridgeError::from)
            .and_then(|(protocol, handler)| {
                debug!(
                    protocol = %protocol,
                    service = %route.service,
                    method = %route.method,
                    "Opening local stream"
                );
                handler
                    .call(outbound)
                    .map_err(|status| BridgeError::Init(status.message().to_string()))
            });

        Box::pin(future::ready(opened))
    }
}
