//! Length-prefixed framing for the live channel
//!
//! Every envelope travels as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf Envelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Largest accepted frame body (1 MB); live payloads are small JSON values
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const LEN_PREFIX: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Envelope without header")]
    MissingHeader,

    #[error("Envelope without payload")]
    MissingPayload,

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode an envelope into a standalone frame
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(envelope, &mut buf)?;
    Ok(buf.freeze())
}

/// Append one frame for `envelope` to `buf`
pub fn encode_into(envelope: &Envelope, buf: &mut BytesMut) -> Result<(), CodecError> {
    let body_len = envelope.encoded_len();
    if body_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    buf.reserve(LEN_PREFIX + body_len);
    buf.put_u32(body_len as u32);
    envelope.encode(buf)?;
    Ok(())
}

/// Try to take one complete frame off the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched when the frame is still incomplete.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(body_len));
    }

    if buf.len() < LEN_PREFIX + body_len as usize {
        return Ok(None);
    }

    buf.advance(LEN_PREFIX);
    let body = buf.split_to(body_len as usize);
    let envelope = Envelope::decode(body)?;
    validate(&envelope)?;
    Ok(Some(envelope))
}

/// Reject envelopes the routing layers cannot attribute or dispatch
pub fn validate(envelope: &Envelope) -> Result<(), CodecError> {
    if envelope.header.is_none() {
        return Err(CodecError::MissingHeader);
    }
    if envelope.payload.is_none() {
        return Err(CodecError::MissingPayload);
    }
    Ok(())
}

/// Accumulates stream bytes and yields complete envelopes
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Call repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
