//! The seam between the bridge and whatever actually carries a call.
//!
//! A transport is handed the outbound half as a stream of encoded records and returns the
//! inbound half as a stream of records or a terminal [`Status`]. Ending the outbound stream is
//! the transport's end-of-stream signal; ending the inbound stream is a clean completion.

mod echo;
pub mod error;
mod grpc;
mod local;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tonic::Status;

use crate::error::BridgeError;
use crate::protocol::ProtocolSelection;

pub use echo::EchoService;
pub use grpc::{BytesCodec, GrpcTransport};
pub use local::{BidiHandler, HandlerRegistry, LocalTransport};

/// Encoded records flowing from the caller to the remote.
pub type OutboundStream = BoxStream<'static, Bytes>;

/// Encoded records flowing back, ended by a clean close or a terminal status.
pub type InboundStream = BoxStream<'static, Result<Bytes, Status>>;

/// Where a call is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub method: String,
    pub protocol: ProtocolSelection,
}

impl Route {
    /// The HTTP/2 path of the method: `/{service}/{method}`.
    pub fn grpc_path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// Opens the underlying session for one bidirectional call.
pub trait StreamTransport: Send + Sync + 'static {
    fn open(
        &self,
        route: &Route,
        outbound: OutboundStream,
    ) -> BoxFuture<'static, Result<InboundStream, BridgeError>>;
}
