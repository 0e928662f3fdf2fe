use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::header::{MessageHeader, HEADER_LEN, MAX_BODY_BYTES};

/// A fully framed inbound message: header plus raw body bytes.
///
/// Body interpretation is deferred to the typed payload parsers so a framing
/// problem and a payload problem are distinguishable in the log.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub header: MessageHeader,
    pub body: Bytes,
}

/// An outbound message. `data_length` in the header is overwritten from the
/// body at encode time so callers cannot produce an inconsistent frame.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub header: MessageHeader,
    pub body: Bytes,
}

impl OutboundFrame {
    pub fn bodyless(header: MessageHeader) -> Self {
        Self {
            header,
            body: Bytes::new(),
        }
    }
}

/// Length-delimited codec over the fixed 24-byte header.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: Option<MessageHeader>,
}

impl Decoder for FrameCodec {
    type Item = InboundFrame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<InboundFrame>, WireError> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }
                let mut header_bytes = src.split_to(HEADER_LEN);
                MessageHeader::decode(&mut header_bytes)?
            }
        };

        let body_len = header.data_length as usize;
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        let body = src.split_to(body_len).freeze();
        Ok(Some(InboundFrame { header, body }))
    }
}

impl Encoder<OutboundFrame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: OutboundFrame, dst: &mut BytesMut) -> Result<(), WireError> {
        if frame.body.len() as u32 > MAX_BODY_BYTES {
            return Err(WireError::OversizedBody {
                declared: frame.body.len() as u32,
                max: MAX_BODY_BYTES,
            });
        }
        let mut header = frame.header;
        header.data_length = frame.body.len() as u32;

        dst.reserve(HEADER_LEN + frame.body.len());
        header.encode(dst);
        dst.extend_from_slice(&frame.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageCode;
    use seeker_model::{ActivityId, WireTimestamp};

    fn frame(code: MessageCode, body: &[u8]) -> OutboundFrame {
        OutboundFrame {
            header: MessageHeader {
                code,
                activity_id: ActivityId(3),
                message_number: 1,
                timestamp: WireTimestamp::new(100, 5),
                data_length: 0,
            },
            body: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let mut codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        codec
            .encode(frame(MessageCode::Status, b"payload"), &mut wire)
            .unwrap();

        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.header.code, MessageCode::Status);
        assert_eq!(decoded.header.data_length, 7);
        assert_eq!(&decoded.body[..], b"payload");
        assert!(wire.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        codec
            .encode(frame(MessageCode::Ready, b"abcdef"), &mut wire)
            .unwrap();

        // Feed the header plus half the body.
        let mut partial = wire.split_to(HEADER_LEN + 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&wire);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(&decoded.body[..], b"abcdef");
    }

    #[test]
    fn multiple_frames_in_one_read_all_decode() {
        let mut codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        codec.encode(frame(MessageCode::Ready, b""), &mut wire).unwrap();
        codec.encode(frame(MessageCode::Status, b"xy"), &mut wire).unwrap();

        let first = codec.decode(&mut wire).unwrap().unwrap();
        let second = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.header.code, MessageCode::Ready);
        assert_eq!(second.header.code, MessageCode::Status);
        assert_eq!(&second.body[..], b"xy");
    }
}
