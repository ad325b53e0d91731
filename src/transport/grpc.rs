use bytes::{Buf, BufMut, Bytes};
use futures::future::BoxFuture;
use futures::{StreamExt, stream};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, info};

use super::{InboundStream, OutboundStream, Route, StreamTransport};
use crate::error::BridgeError;

/// A gRPC codec that moves message bodies as opaque bytes.
///
/// Records are already encoded by the bridge (or by the caller), so no protobuf work happens
/// here.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        *self
    }

    fn decoder(&mut self) -> Self::Decoder {
        *self
    }
}

impl Encoder for BytesCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}

/// Carries calls to a remote gRPC server over a tonic [`Channel`].
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    channel: Channel,
}

impl GrpcTransport {
    /// Build a transport for `endpoint` (e.g., "http://[::1]:50051").
    ///
    /// The connection is made on first use, so this must be called from within a tokio
    /// runtime but never fails on an unreachable server.
    pub fn connect_lazy(endpoint: impl Into<String>) -> Result<Self, BridgeError> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| BridgeError::Init(format!("invalid endpoint '{endpoint}': {e}")))?
            .connect_lazy();

        info!(endpoint = %endpoint, "gRPC transport configured");
        Ok(Self { channel })
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }
}

impl StreamTransport for GrpcTransport {
    /// Waits only for the channel to accept a request. Response headers are awaited lazily by
    /// the inbound stream, since a server may hold them back until the first request message,
    /// which the caller cannot send before the call is started.
    fn open(
        &self,
        route: &Route,
        outbound: OutboundStream,
    ) -> BoxFuture<'static, Result<InboundStream, BridgeError>> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        let path = route.grpc_path();

        Box::pin(async move {
            let path = PathAndQuery::try_from(path)
                .map_err(|e| BridgeError::Init(format!("invalid method path: {e}")))?;

            grpc.ready()
                .await
                .map_err(|e| BridgeError::Init(format!("channel not ready: {e}")))?;

            debug!(path = %path, "Opening gRPC stream");

            let call =
                async move { grpc.streaming(Request::new(outbound), path, BytesCodec).await };

            // A failed call surfaces as the stream's terminal status.
            let inbound = stream::once(call)
                .flat_map(|response| match response {
                    Ok(response) => response.into_inner().boxed(),
                    Err(status) => stream::iter([Err(status)]).boxed(),
                })
                .boxed();

            Ok(inbound)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RecordAux, decode_payload, encode_record};
    use crate::error::ErrorCode;
    use crate::protocol::ProtocolSelection;
    use futures::stream::BoxStream;
    use std::convert::Infallible;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tonic::body::Body;
    use tonic::codegen::{Service, http};
    use tonic::server::{NamedService, StreamingService};

    const SERVICE: &str = "bidi.StreamService";

    fn route() -> Route {
        Route {
            service: SERVICE.to_string(),
            method: "BidiStreamCall".to_string(),
            protocol: ProtocolSelection::Unset,
        }
    }

    /// Echoes each request record back, but only sends response headers once the first request
    /// message has arrived.
    #[derive(Clone)]
    struct HeldHeadersEcho;

    struct EchoMethod;

    impl StreamingService<Bytes> for EchoMethod {
        type Response = Bytes;
        type ResponseStream = BoxStream<'static, Result<Bytes, Status>>;
        type Future = BoxFuture<'static, Result<tonic::Response<Self::ResponseStream>, Status>>;

        fn call(&mut self, request: tonic::Request<tonic::Streaming<Bytes>>) -> Self::Future {
            Box::pin(async move {
                let mut requests = request.into_inner();
                let first = requests
                    .message()
                    .await?
                    .ok_or_else(|| Status::invalid_argument("no request before close"))?;

                let replies = async_stream::stream! {
                    yield Ok(first);
                    while let Some(next) = requests.next().await {
                        yield next;
                    }
                };
                let replies: Self::ResponseStream = Box::pin(replies);
                Ok(tonic::Response::new(replies))
            })
        }
    }

    impl Service<http::Request<Body>> for HeldHeadersEcho {
        type Response = http::Response<Body>;
        type Error = Infallible;
        type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<Body>) -> Self::Future {
            if req.uri().path() != route().grpc_path() {
                let response = Status::unimplemented("unknown method").into_http::<Body>();
                return Box::pin(async move { Ok(response) });
            }
            Box::pin(async move {
                let mut grpc = tonic::server::Grpc::new(BytesCodec);
                Ok(grpc.streaming(EchoMethod, req).await)
            })
        }
    }

    impl NamedService for HeldHeadersEcho {
        const NAME: &'static str = SERVICE;
    }

    /// Serve [`HeldHeadersEcho`] on one loopback connection and return a transport for it.
    async fn held_headers_server() -> GrpcTransport {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tonic::transport::Server::builder()
                .add_service(HeldHeadersEcho)
                .serve_with_incoming(tokio_stream::once(Ok::<_, std::io::Error>(socket)))
                .await
                .unwrap();
        });

        GrpcTransport::connect_lazy(format!("http://{addr}")).unwrap()
    }

    #[test]
    fn test_invalid_endpoint_is_init_error() {
        let result = GrpcTransport::connect_lazy("not a uri");
        assert!(matches!(result, Err(BridgeError::Init(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_open_does_not_wait_for_response_headers() {
        let transport = held_headers_server().await;
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

        let mut inbound = tokio::time::timeout(
            Duration::from_secs(3),
            transport.open(&route(), UnboundedReceiverStream::new(rx).boxed()),
        )
        .await
        .expect("open waited for response headers")
        .unwrap();

        for (sequence, msg) in ["X", "Y"].iter().enumerate() {
            let aux = RecordAux {
                sequence: sequence as i32,
                repeat: 0,
            };
            tx.send(encode_record(msg.as_bytes(), aux)).unwrap();
        }
        drop(tx);

        let replies = tokio::time::timeout(Duration::from_secs(5), async move {
            let mut replies = Vec::new();
            while let Some(reply) = inbound.next().await {
                replies.push(reply.unwrap());
            }
            replies
        })
        .await
        .expect("stream did not end");

        let payloads: Vec<Bytes> = replies
            .iter()
            .map(|record| decode_payload(record).unwrap())
            .collect();
        assert_eq!(payloads, vec![Bytes::from_static(b"X"), Bytes::from_static(b"Y")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_method_is_terminal_status() {
        let transport = held_headers_server().await;
        let mut missing = route();
        missing.method = "Missing".to_string();

        let mut inbound = transport
            .open(&missing, Box::pin(stream::empty::<Bytes>()))
            .await
            .unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), inbound.next())
            .await
            .expect("no terminal status")
            .expect("stream ended without a status")
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
        assert_eq!(ErrorCode::from_status(&status), ErrorCode::RemoteError);
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Nothing listens on the discard port.
        let transport = GrpcTransport::connect_lazy("http://127.0.0.1:9").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), async move {
            match transport
                .open(&route(), Box::pin(stream::empty::<Bytes>()))
                .await
            {
                Ok(mut inbound) => match inbound.next().await {
                    Some(Err(status)) => ErrorCode::from_status(&status),
                    other => panic!("expected a terminal status, got {other:?}"),
                },
                Err(e) => e.code(),
            }
        })
        .await
        .expect("unreachable server should fail fast");

        assert!(matches!(
            result,
            ErrorCode::TransportError | ErrorCode::InitError
        ));
    }
}
