use bytes::{Buf, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Envelope, MAX_MESSAGE_SIZE};

const HEADER_LEN: usize = 5;

/// Codec for framing envelopes on a byte stream.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode an envelope with framing: [4 bytes len][1 byte tag][payload]
    pub fn encode(envelope: &Envelope) -> ProtocolResult<Vec<u8>> {
        let payload = bincode::serialize(envelope)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(envelope.message.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one framed envelope. Returns (envelope, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(Envelope, usize)> {
        match Self::frame_len(data)? {
            Some(total) => {
                let envelope = Self::decode_body(data[4], &data[HEADER_LEN..total])?;
                Ok((envelope, total))
            }
            None => Err(ProtocolError::FramingError(format!(
                "incomplete frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Decode the next envelope from a stream buffer, consuming its bytes.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full frame.
    pub fn try_decode(buf: &mut BytesMut) -> ProtocolResult<Option<Envelope>> {
        let Some(total) = Self::frame_len(buf)? else {
            return Ok(None);
        };
        let frame = buf.split_to(total);
        let envelope = Self::decode_body(frame[4], &frame[HEADER_LEN..])?;
        Ok(Some(envelope))
    }

    /// Total frame length if `data` holds a complete frame.
    fn frame_len(data: &[u8]) -> ProtocolResult<Option<usize>> {
        if data.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &data[0..4];
        let len = header.get_u32() as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let total = 4 + len;
        if data.len() < total {
            return Ok(None);
        }
        Ok(Some(total))
    }

    fn decode_body(tag: u8, payload: &[u8]) -> ProtocolResult<Envelope> {
        let envelope: Envelope = bincode::deserialize(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if envelope.message.type_tag() != tag {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        Ok(envelope)
    }
}
