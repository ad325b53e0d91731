//! Payload codecs for the two call variants.
//!
//! Both variants put the same [`StreamRecord`] on the wire:
//!
//! - [`Variant::Framed`]: the caller hands the bridge an already encoded record and receives
//!   encoded records back. The bridge only checks that inbound bytes decode as a record.
//! - [`Variant::Native`]: the caller hands the bridge raw payload bytes plus a sequence number
//!   and the bridge does the framing itself, so the caller never touches the record format.

mod framed;
mod native;

use bytes::Bytes;

pub use framed::{RecordAux, StreamRecord, decode_payload, encode_record};
pub use native::{DECODE_ERROR_SEQUENCE, NativeFrame};

/// The payload flavor a call was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Framed,
    Native,
}

/// A decoded inbound transmission, ready to be handed to the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub payload: Bytes,
    /// Set only for the native variant.
    pub sequence: Option<i32>,
}

/// An inbound transmission that did not decode as a stream record.
///
/// The raw bytes are kept so framed receivers can still be handed what the remote sent.
#[derive(Debug, thiserror::Error)]
#[error("malformed stream record ({} bytes)", .raw.len())]
pub struct MalformedRecord {
    pub raw: Bytes,
    #[source]
    pub source: prost::DecodeError,
}

/// Decode one inbound transmission according to `variant`.
pub fn decode_inbound(variant: Variant, raw: Bytes) -> Result<Inbound, MalformedRecord> {
    match variant {
        Variant::Framed => match framed::validate(&raw) {
            Ok(()) => Ok(Inbound {
                payload: raw,
                sequence: None,
            }),
            Err(source) => Err(MalformedRecord { raw, source }),
        },
        Variant::Native => match NativeFrame::decode(raw.clone()) {
            Ok(frame) => Ok(Inbound {
                payload: frame.payload,
                sequence: Some(frame.sequence),
            }),
            Err(source) => Err(MalformedRecord { raw, source }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framed_inbound_is_passed_through() {
        let record = encode_record(b"echo:X", RecordAux::default());

        let inbound = decode_inbound(Variant::Framed, record.clone()).unwrap();

        assert_eq!(inbound.payload, record);
        assert_eq!(inbound.sequence, None);
    }

    #[test]
    fn test_native_inbound_is_unframed() {
        let raw = NativeFrame {
            payload: Bytes::from_static(b"echo:Y"),
            sequence: 1,
        }
        .encode();

        let inbound = decode_inbound(Variant::Native, raw).unwrap();

        assert_eq!(&inbound.payload[..], b"echo:Y");
        assert_eq!(inbound.sequence, Some(1));
    }

    #[test]
    fn test_malformed_inbound_keeps_raw_bytes() {
        // Field 1 claims five bytes but only one follows.
        let garbage = Bytes::from_static(&[0x0a, 0x05, b'a']);

        let framed = decode_inbound(Variant::Framed, garbage.clone()).unwrap_err();
        assert_eq!(framed.raw, garbage);

        let native = decode_inbound(Variant::Native, garbage.clone()).unwrap_err();
        assert_eq!(native.raw, garbage);
    }
}
