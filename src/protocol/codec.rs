//! Frame serialization and incremental deserialization.
//!
//! A frame on the wire is `header (8) | payload (0..=65535) | crc32 (4, LE)`.
//! The checksum covers the payload bytes only.
//!
//! Decoding works over whatever prefix of the stream has arrived so far:
//! `Ok(None)` means "need more bytes" and consumes nothing.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{
    crc32,
    errors::{FrameError, Result},
    flags::FrameFlags,
    header::FrameHeader,
};

pub const CHECKSUM_SIZE: usize = 4;

pub const MIN_FRAME_SIZE: usize = FrameHeader::SIZE + CHECKSUM_SIZE;

pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

pub const MAX_FRAME_SIZE: usize = MIN_FRAME_SIZE + MAX_PAYLOAD_SIZE;

/// Borrowed view of one complete, checksum-verified frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef<'a> {
    pub header: &'a FrameHeader,
    pub payload: &'a [u8],
    pub checksum: u32,
}

impl FrameRef<'_> {
    pub fn frame_len(&self) -> usize {
        frame_size(self.header)
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            header: *self.header,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// Owned frame, detached from the buffer it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn message_type(&self) -> u8 {
        self.header.message_type()
    }

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<usize> {
        serialize(&self.header, &self.payload, dst)
    }
}

/// Total encoded size of the frame described by `header`.
pub fn frame_size(header: &FrameHeader) -> usize {
    MIN_FRAME_SIZE + header.payload_length() as usize
}

/// Write `header`, `payload` and the payload checksum into `dst`.
///
/// Everything is validated before the first byte is written, so on error `dst`
/// is untouched. Returns the number of bytes written.
pub fn serialize(header: &FrameHeader, payload: &[u8], dst: &mut impl BufMut) -> Result<usize> {
    header.validate()?;

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    if header.payload_length() as usize != payload.len() {
        return Err(FrameError::PayloadLengthMismatch {
            header: header.payload_length() as usize,
            actual: payload.len(),
        });
    }

    let needed = MIN_FRAME_SIZE + payload.len();
    if dst.remaining_mut() < needed {
        return Err(FrameError::BufferTooSmall {
            needed,
            available: dst.remaining_mut(),
        });
    }

    dst.put_slice(&header.to_bytes());
    dst.put_slice(payload);
    dst.put_u32_le(crc32::checksum(payload));

    Ok(needed)
}

/// Build a complete frame for `payload` in a fresh buffer.
pub fn encode_frame(message_type: impl Into<u8>, flags: FrameFlags, payload: &[u8]) -> Result<Bytes> {
    let length = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_PAYLOAD_SIZE,
    })?;

    let header = FrameHeader::new(message_type, flags, length);
    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
    serialize(&header, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Parse a header from the front of `bytes`.
///
/// `Ok(None)` if fewer than [`FrameHeader::SIZE`] bytes are present.
pub fn deserialize_header(bytes: &[u8]) -> Result<Option<&FrameHeader>> {
    FrameHeader::parse(bytes)
}

/// Extract the first frame from `bytes`.
///
/// On success returns the frame and the number of bytes it occupies.
/// `Ok(None)` while the frame is still incomplete. A checksum failure reports
/// the full frame length so the caller can discard it and carry on with the
/// next one.
pub fn deserialize_frame(bytes: &[u8]) -> Result<Option<(FrameRef<'_>, usize)>> {
    let Some(header) = deserialize_header(bytes)? else {
        return Ok(None);
    };

    let frame_len = frame_size(header);
    if bytes.len() < frame_len {
        return Ok(None);
    }

    let payload_end = FrameHeader::SIZE + header.payload_length() as usize;
    let payload = &bytes[FrameHeader::SIZE..payload_end];

    let mut trailer = [0u8; CHECKSUM_SIZE];
    trailer.copy_from_slice(&bytes[payload_end..frame_len]);
    let expected = u32::from_le_bytes(trailer);

    let actual = crc32::checksum(payload);
    if actual != expected {
        return Err(FrameError::ChecksumMismatch {
            expected,
            actual,
            frame_len,
        });
    }

    Ok(Some((
        FrameRef {
            header,
            payload,
            checksum: expected,
        },
        frame_len,
    )))
}

/// True iff `bytes` holds exactly one well-formed frame.
pub fn validate_frame(bytes: &[u8]) -> bool {
    matches!(deserialize_frame(bytes), Ok(Some((_, consumed))) if consumed == bytes.len())
}

/// Number of leading bytes to discard to reach the next candidate header
/// after the stream lost sync. Always skips at least one byte.
pub fn resync_offset(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .skip(1)
        .position(|&b| b == FrameHeader::MAGIC)
        .map_or(bytes.len(), |pos| pos + 1)
}
