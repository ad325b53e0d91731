use bytes::Bytes;
use prost::Message;

/// The record carried by every stream transmission.
///
/// Field 1 is the payload. Other field numbers carry per-call auxiliary metadata and are
/// opaque to the bridge.
#[derive(Clone, PartialEq, Message)]
pub struct StreamRecord {
    #[prost(bytes = "bytes", tag = "1")]
    pub payload: Bytes,
    #[prost(int32, tag = "2")]
    pub sequence: i32,
    #[prost(uint32, tag = "3")]
    pub repeat: u32,
}

/// Auxiliary integer fields written next to the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordAux {
    pub sequence: i32,
    pub repeat: u32,
}

/// Wrap `payload` as field 1 of a stream record.
pub fn encode_record(payload: &[u8], aux: RecordAux) -> Bytes {
    let record = StreamRecord {
        payload: Bytes::copy_from_slice(payload),
        sequence: aux.sequence,
        repeat: aux.repeat,
    };
    Bytes::from(record.encode_to_vec())
}

/// Extract field 1 from an encoded stream record.
pub fn decode_payload(record: &[u8]) -> Result<Bytes, prost::DecodeError> {
    StreamRecord::decode(record).map(|r| r.payload)
}

pub(super) fn validate(record: &[u8]) -> Result<(), prost::DecodeError> {
    StreamRecord::decode(record).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_field_one() {
        let record = encode_record(b"X", RecordAux::default());

        // tag 1, wire type 2 (length delimited), length 1, 'X'
        assert_eq!(&record[..], &[0x0a, 0x01, b'X']);
    }

    #[test]
    fn test_aux_fields_do_not_disturb_payload() {
        let record = encode_record(
            b"hello",
            RecordAux {
                sequence: 2,
                repeat: 3,
            },
        );

        let decoded = StreamRecord::decode(&record[..]).unwrap();
        assert_eq!(&decoded.payload[..], b"hello");
        assert_eq!(decoded.sequence, 2);
        assert_eq!(decoded.repeat, 3);
        assert_eq!(&decode_payload(&record).unwrap()[..], b"hello");
    }

    #[test]
    fn test_empty_record_has_empty_payload() {
        assert!(decode_payload(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_tag_is_rejected() {
        assert!(decode_payload(&[0x00]).is_err());
        assert!(validate(&[0x0a, 0x05, b'a']).is_err());
    }
}
