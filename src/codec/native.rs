use bytes::Bytes;
use prost::Message;

use super::framed::StreamRecord;

/// Sequence reported to native receivers in place of a message that failed to decode.
pub const DECODE_ERROR_SEQUENCE: i32 = -1;

/// Raw payload plus sequence number, framed by the bridge on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFrame {
    pub payload: Bytes,
    pub sequence: i32,
}

impl NativeFrame {
    pub fn encode(&self) -> Bytes {
        let record = StreamRecord {
            payload: self.payload.clone(),
            sequence: self.sequence,
            repeat: 0,
        };
        Bytes::from(record.encode_to_vec())
    }

    pub fn decode(raw: Bytes) -> Result<Self, prost::DecodeError> {
        let record = StreamRecord::decode(raw)?;
        Ok(Self {
            payload: record.payload,
            sequence: record.sequence,
        })
    }
}
