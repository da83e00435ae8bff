//! Wire format: length-prefixed binary frames with a CRC32 trailer.
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┬──────────────┐
//! │ header (8 bytes) │ payload (0..=65535 bytes) │ crc32 (4, LE)│
//! └──────────────────┴──────────────────────────┴──────────────┘
//! ```
//!
//! [`codec`] frames and unframes raw bytes; [`messages`] turns payloads into
//! typed values. The header is viewed in place over the read buffer through
//! `zerocopy`, so routing a frame never copies it.

pub mod codec;
pub mod crc32;
pub mod errors;
pub mod flags;
pub mod header;
pub mod message_type;
pub mod messages;

pub use codec::{
    deserialize_frame, deserialize_header, encode_frame, frame_size, resync_offset, serialize,
    validate_frame, Frame, FrameRef, CHECKSUM_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE,
    MIN_FRAME_SIZE,
};
pub use errors::{DecodeError, FrameError};
pub use flags::FrameFlags;
pub use header::FrameHeader;
pub use message_type::MessageType;
pub use messages::{
    DataMessage, EchoMessage, Message, Payload, PingMessage, PongMessage, StatusMessage,
};
