use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use prost::Message;
use tonic::Status;

use super::{BidiHandler, InboundStream, OutboundStream};
use crate::codec::StreamRecord;

const ECHO_PREFIX: &[u8] = b"echo:";

/// Replies to every record with `"echo:" + payload`, keeping its auxiliary fields.
///
/// A request that is not a valid record ends the call with `INVALID_ARGUMENT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl BidiHandler for EchoService {
    fn call(&self, mut requests: OutboundStream) -> Result<InboundStream, Status> {
        let replies = async_stream::stream! {
            while let Some(raw) = requests.next().await {
                match StreamRecord::decode(raw) {
                    Ok(request) => {
                        let mut payload =
                            BytesMut::with_capacity(ECHO_PREFIX.len() + request.payload.len());
                        payload.extend_from_slice(ECHO_PREFIX);
                        payload.extend_from_slice(&request.payload);

                        let reply = StreamRecord {
                            payload: payload.freeze(),
                            sequence: request.sequence,
                            repeat: request.repeat,
                        };
                        yield Ok(Bytes::from(reply.encode_to_vec()));
                    }
                    Err(e) => {
                        yield Err(Status::invalid_argument(format!(
                            "malformed request record: {e}"
                        )));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RecordAux, decode_payload, encode_record};
    use futures::stream;

    #[tokio::test]
    async fn test_echoes_in_order() {
        let requests = stream::iter(["X", "Y", "Z"].into_iter().enumerate().map(|(i, s)| {
            encode_record(
                s.as_bytes(),
                RecordAux {
                    sequence: i as i32,
                    repeat: 0,
                },
            )
        }));

        let replies: Vec<_> = EchoService
            .call(Box::pin(requests))
            .unwrap()
            .collect()
            .await;

        let payloads: Vec<_> = replies
            .into_iter()
            .map(|r| decode_payload(&r.unwrap()).unwrap())
            .collect();
        assert_eq!(payloads, vec!["echo:X", "echo:Y", "echo:Z"]);
    }

    #[tokio::test]
    async fn test_sequence_is_preserved() {
        let request = encode_record(
            b"seq",
            RecordAux {
                sequence: 41,
                repeat: 2,
            },
        );

        let mut replies = EchoService.call(Box::pin(stream::iter([request]))).unwrap();
        let reply = StreamRecord::decode(replies.next().await.unwrap().unwrap()).unwrap();

        assert_eq!(reply.sequence, 41);
        assert_eq!(reply.repeat, 2);
        assert!(replies.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_request_ends_with_status() {
        let garbage = Bytes::from_static(&[0x0a, 0x05, b'a']);

        let replies: Vec<_> = EchoService
            .call(Box::pin(stream::iter([garbage, encode_record(b"late", RecordAux::default())])))
            .unwrap()
            .collect()
            .await;

        assert_eq!(replies.len(), 1);
        assert!(matches!(&replies[0], Err(s) if s.code() == tonic::Code::InvalidArgument));
    }
}
