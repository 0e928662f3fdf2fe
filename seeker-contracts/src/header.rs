use bytes::{Buf, BufMut};
use seeker_model::{ActivityId, WireTimestamp};

use crate::error::WireError;
use crate::message::MessageCode;

/// Fixed wire size of a message header.
pub const HEADER_LEN: usize = 24;

/// Upper bound on a declared body length. A header declaring more than this
/// is treated as stream corruption and closes the connection.
pub const MAX_BODY_BYTES: u32 = 1_000_000;

/// Message numbers start at 1 in each direction.
pub const INITIAL_MESSAGE_NUMBER: u32 = 1;

/// Framed message header. All integer fields are big-endian on the wire.
///
/// Layout: code(u32) activityId(i32) messageNumber(u32)
/// timestampSecs(u32) timestampMicros(u32) dataLength(u32).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageHeader {
    pub code: MessageCode,
    pub activity_id: ActivityId,
    pub message_number: u32,
    pub timestamp: WireTimestamp,
    pub data_length: u32,
}

impl MessageHeader {
    pub fn new(code: MessageCode, activity_id: ActivityId) -> Self {
        Self {
            code,
            activity_id,
            message_number: 0,
            timestamp: WireTimestamp::default(),
            data_length: 0,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.code as u32);
        buf.put_i32(self.activity_id.0 as i32);
        buf.put_u32(self.message_number);
        buf.put_u32(self.timestamp.secs);
        buf.put_u32(self.timestamp.micros);
        buf.put_u32(self.data_length);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        if buf.remaining() < HEADER_LEN {
            return Err(WireError::Truncated {
                what: "header",
                needed: HEADER_LEN,
                available: buf.remaining(),
            });
        }
        let code = MessageCode::try_from(buf.get_u32())?;
        let activity_id = ActivityId(i64::from(buf.get_i32()));
        let message_number = buf.get_u32();
        let secs = buf.get_u32();
        let micros = buf.get_u32();
        let data_length = buf.get_u32();
        if data_length > MAX_BODY_BYTES {
            return Err(WireError::OversizedBody {
                declared: data_length,
                max: MAX_BODY_BYTES,
            });
        }
        Ok(Self {
            code,
            activity_id,
            message_number,
            timestamp: WireTimestamp::new(secs, micros),
            data_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_round_trips_byte_identical() {
        let hdr = MessageHeader {
            code: MessageCode::Status,
            activity_id: ActivityId(42),
            message_number: 7,
            timestamp: WireTimestamp::new(1_254_870_056, 123_456),
            data_length: 16,
        };
        let mut first = BytesMut::new();
        hdr.encode(&mut first);
        assert_eq!(first.len(), HEADER_LEN);

        let decoded = MessageHeader::decode(&mut first.clone()).unwrap();
        assert_eq!(decoded, hdr);

        let mut second = BytesMut::new();
        decoded.encode(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_body_is_rejected() {
        let hdr = MessageHeader {
            code: MessageCode::Status,
            activity_id: ActivityId::NONE,
            message_number: 1,
            timestamp: WireTimestamp::default(),
            data_length: MAX_BODY_BYTES + 1,
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert!(matches!(
            MessageHeader::decode(&mut buf),
            Err(WireError::OversizedBody { .. })
        ));
    }
}
