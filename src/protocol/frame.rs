//! Binary audio frame and its wire codec.
//!
//! Frame format (26 bytes header, big-endian):
//! - Magic: 4 bytes (`TCAF`)
//! - Version: 1 byte
//! - Tier: 1 byte
//! - Flags: 2 bytes (reserved)
//! - Stream ID: 4 bytes
//! - Sequence: 4 bytes (starts at 1, per tier)
//! - Presentation time: 8 bytes (milliseconds)
//! - Payload length: 2 bytes
//! - Payload: variable (opaque compressed audio)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MalformedReason, ProtocolError};

/// One audio unit plus its framing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Quality tier (1..N)
    pub tier: u8,
    /// Reserved flags, carried untouched
    pub flags: u16,
    /// Logical stream identifier
    pub stream_id: u32,
    /// Per-tier sequence number
    pub sequence: u32,
    /// Presentation time in milliseconds
    pub presentation_time_ms: u64,
    /// Opaque audio payload
    pub payload: Bytes,
}

impl Frame {
    /// Header size in bytes
    pub const HEADER_SIZE: usize = 26;

    /// Frame magic tag
    pub const MAGIC: u32 = u32::from_be_bytes(*b"TCAF");

    /// Current protocol version
    pub const VERSION: u8 = 1;

    /// Largest payload the length field can describe
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    pub fn new(
        stream_id: u32,
        tier: u8,
        sequence: u32,
        presentation_time_ms: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            tier,
            flags: 0,
            stream_id,
            sequence,
            presentation_time_ms,
            payload: payload.into(),
        }
    }

    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame to bytes
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload does not fit the
/// 16-bit length field.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let payload_len = frame.payload.len();
    if payload_len > Frame::MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(payload_len));
    }

    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    buf.put_u32(Frame::MAGIC);
    buf.put_u8(Frame::VERSION);
    buf.put_u8(frame.tier);
    buf.put_u16(frame.flags);
    buf.put_u32(frame.stream_id);
    buf.put_u32(frame.sequence);
    buf.put_u64(frame.presentation_time_ms);
    buf.put_u16(payload_len as u16);
    buf.extend_from_slice(&frame.payload);

    Ok(buf.freeze())
}

/// Decode a frame from one complete message
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] on a short header, wrong magic or
/// version, or a payload length that does not match the bytes present.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let malformed = |reason| Err(ProtocolError::MalformedFrame(reason));

    if data.len() < Frame::HEADER_SIZE {
        return malformed(MalformedReason::TruncatedHeader(data.len()));
    }

    let mut buf = data;

    let magic = buf.get_u32();
    if magic != Frame::MAGIC {
        return malformed(MalformedReason::BadMagic(magic));
    }

    let version = buf.get_u8();
    if version != Frame::VERSION {
        return malformed(MalformedReason::BadVersion(version));
    }

    let tier = buf.get_u8();
    let flags = buf.get_u16();
    let stream_id = buf.get_u32();
    let sequence = buf.get_u32();
    let presentation_time_ms = buf.get_u64();
    let payload_len = buf.get_u16() as usize;

    let available = buf.remaining();
    if available < payload_len {
        return malformed(MalformedReason::TruncatedPayload {
            declared: payload_len,
            available,
        });
    }
    if available > payload_len {
        return malformed(MalformedReason::TrailingBytes(available - payload_len));
    }

    Ok(Frame {
        tier,
        flags,
        stream_id,
        sequence,
        presentation_time_ms,
        payload: Bytes::copy_from_slice(buf),
    })
}
