//! Error types for frame parsing and payload decoding.

use thiserror::Error;

/// Failures while framing or unframing bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid magic byte: expected 0xAB, got {0:#04x}")]
    InvalidMagic(u8),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Header length field disagrees with the payload handed to the encoder
    #[error("payload length mismatch: header says {header} bytes, actual {actual}")]
    PayloadLengthMismatch { header: usize, actual: usize },

    #[error("destination buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// `frame_len` is the full size of the offending frame, so the caller can
    /// skip exactly that many bytes.
    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        expected: u32,
        actual: u32,
        frame_len: usize,
    },

    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),
}

/// Failures while turning a payload into a typed message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("embedded length {declared} exceeds the {available} bytes that follow")]
    LengthMismatch { declared: usize, available: usize },

    #[error("embedded length {length} exceeds maximum {max}")]
    LengthOutOfRange { length: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
