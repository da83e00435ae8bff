//! Typed payloads for the built-in message types.
//!
//! Each payload is encoded field by field in little endian; nothing depends on
//! in-memory struct layout. Decoders ignore bytes past the end of a payload.
//!
//! | Type   | Layout                                                     |
//! |--------|------------------------------------------------------------|
//! | Ping   | `sequence_id u32, timestamp u64`                           |
//! | Pong   | `sequence_id u32, timestamp u64, echo_time u64`            |
//! | Echo   | `length u16, data[length]` (at most 256)                   |
//! | Data   | `data_type u16, data_id u16, data_length u16, data[..]` (at most 512) |
//! | Status | `status_code u8, error_code u16, message utf-8 (rest)`     |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::{
    codec::encode_frame,
    errors::{DecodeError, FrameError},
    flags::FrameFlags,
    message_type::MessageType,
};

/// A message body that can be carried in a frame of type [`Payload::TYPE`].
pub trait Payload: Sized + Send + Sync + 'static {
    const TYPE: MessageType;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;

    fn encode(&self, dst: &mut impl BufMut);

    fn encoded_len(&self) -> usize;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Complete wire frame carrying this payload.
    fn to_frame(&self, flags: FrameFlags) -> Result<Bytes, FrameError> {
        encode_frame(Self::TYPE, flags, &self.to_bytes())
    }
}

fn require(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Splits a `declared`-byte body off the front of `rest`.
fn take_body(mut rest: &[u8], declared: usize, max: usize) -> Result<Bytes, DecodeError> {
    if declared > max {
        return Err(DecodeError::LengthOutOfRange {
            length: declared,
            max,
        });
    }
    if rest.remaining() < declared {
        return Err(DecodeError::LengthMismatch {
            declared,
            available: rest.remaining(),
        });
    }
    Ok(rest.copy_to_bytes(declared))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingMessage {
    pub sequence_id: u32,
    pub timestamp: u64,
}

impl PingMessage {
    pub const SIZE: usize = 12;
}

impl Payload for PingMessage {
    const TYPE: MessageType = MessageType::Ping;

    fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        require(bytes, Self::SIZE)?;
        Ok(Self {
            sequence_id: bytes.get_u32_le(),
            timestamp: bytes.get_u64_le(),
        })
    }

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.sequence_id);
        dst.put_u64_le(self.timestamp);
    }

    fn encoded_len(&self) -> usize {
        Self::SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongMessage {
    pub sequence_id: u32,
    pub timestamp: u64,
    /// When the ping was received.
    pub echo_time: u64,
}

impl PongMessage {
    pub const SIZE: usize = 20;

    pub fn reply_to(ping: &PingMessage, echo_time: u64) -> Self {
        Self {
            sequence_id: ping.sequence_id,
            timestamp: ping.timestamp,
            echo_time,
        }
    }
}

impl Payload for PongMessage {
    const TYPE: MessageType = MessageType::Pong;

    fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        require(bytes, Self::SIZE)?;
        Ok(Self {
            sequence_id: bytes.get_u32_le(),
            timestamp: bytes.get_u64_le(),
            echo_time: bytes.get_u64_le(),
        })
    }

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.sequence_id);
        dst.put_u64_le(self.timestamp);
        dst.put_u64_le(self.echo_time);
    }

    fn encoded_len(&self) -> usize {
        Self::SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    data: Bytes,
}

impl EchoMessage {
    pub const MAX_DATA: usize = 256;

    pub fn new(data: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let data = data.into();
        if data.len() > Self::MAX_DATA {
            return Err(DecodeError::LengthOutOfRange {
                length: data.len(),
                max: Self::MAX_DATA,
            });
        }
        Ok(Self { data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Payload for EchoMessage {
    const TYPE: MessageType = MessageType::Echo;

    fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        require(bytes, 2)?;
        let declared = bytes.get_u16_le() as usize;
        let data = take_body(bytes, declared, Self::MAX_DATA)?;
        Ok(Self { data })
    }

    fn encode(&self, dst: &mut impl BufMut) {
        // length bounded by MAX_DATA at construction
        dst.put_u16_le(self.data.len() as u16);
        dst.put_slice(&self.data);
    }

    fn encoded_len(&self) -> usize {
        2 + self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub data_type: u16,
    pub data_id: u16,
    data: Bytes,
}

impl DataMessage {
    pub const MAX_DATA: usize = 512;

    const HEADER_LEN: usize = 6;

    pub fn new(data_type: u16, data_id: u16, data: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let data = data.into();
        if data.len() > Self::MAX_DATA {
            return Err(DecodeError::LengthOutOfRange {
                length: data.len(),
                max: Self::MAX_DATA,
            });
        }
        Ok(Self {
            data_type,
            data_id,
            data,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Payload for DataMessage {
    const TYPE: MessageType = MessageType::Data;

    fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        require(bytes, Self::HEADER_LEN)?;
        let data_type = bytes.get_u16_le();
        let data_id = bytes.get_u16_le();
        let declared = bytes.get_u16_le() as usize;
        let data = take_body(bytes, declared, Self::MAX_DATA)?;
        Ok(Self {
            data_type,
            data_id,
            data,
        })
    }

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.data_type);
        dst.put_u16_le(self.data_id);
        dst.put_u16_le(self.data.len() as u16);
        dst.put_slice(&self.data);
    }

    fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub status_code: u8,
    pub error_code: u16,
    message: String,
}

impl StatusMessage {
    /// Longest message text kept, in bytes.
    pub const MAX_MESSAGE: usize = 63;

    const HEADER_LEN: usize = 3;

    /// Longer messages are cut at the last character boundary that fits.
    pub fn new(status_code: u8, error_code: u16, message: &str) -> Self {
        Self {
            status_code,
            error_code,
            message: truncate_utf8(message, Self::MAX_MESSAGE).to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl Payload for StatusMessage {
    const TYPE: MessageType = MessageType::Status;

    fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        require(bytes, Self::HEADER_LEN)?;
        let status_code = bytes.get_u8();
        let error_code = bytes.get_u16_le();
        let text = &bytes[..bytes.len().min(Self::MAX_MESSAGE)];
        let message = String::from_utf8_lossy(text);
        Ok(Self {
            status_code,
            error_code,
            message: truncate_utf8(&message, Self::MAX_MESSAGE).to_string(),
        })
    }

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.status_code);
        dst.put_u16_le(self.error_code);
        dst.put_slice(self.message.as_bytes());
    }

    fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.message.len()
    }
}

/// Any built-in message, decoded by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    Echo(EchoMessage),
    Data(DataMessage),
    Status(StatusMessage),
}

impl Message {
    pub fn decode(message_type: MessageType, bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(match message_type {
            MessageType::Ping => Self::Ping(PingMessage::decode(bytes)?),
            MessageType::Pong => Self::Pong(PongMessage::decode(bytes)?),
            MessageType::Echo => Self::Echo(EchoMessage::decode(bytes)?),
            MessageType::Data => Self::Data(DataMessage::decode(bytes)?),
            MessageType::Status => Self::Status(StatusMessage::decode(bytes)?),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Ping(_) => MessageType::Ping,
            Self::Pong(_) => MessageType::Pong,
            Self::Echo(_) => MessageType::Echo,
            Self::Data(_) => MessageType::Data,
            Self::Status(_) => MessageType::Status,
        }
    }

    pub fn to_frame(&self, flags: FrameFlags) -> Result<Bytes, FrameError> {
        match self {
            Self::Ping(m) => m.to_frame(flags),
            Self::Pong(m) => m.to_frame(flags),
            Self::Echo(m) => m.to_frame(flags),
            Self::Data(m) => m.to_frame(flags),
            Self::Status(m) => m.to_frame(flags),
        }
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_payload! {
    Ping => PingMessage,
    Pong => PongMessage,
    Echo => EchoMessage,
    Data => DataMessage,
    Status => StatusMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::deserialize_frame;

    #[test]
    fn ping_layout() {
        let ping = PingMessage {
            sequence_id: 0x0102_0304,
            timestamp: 0x1122_3344_5566_7788,
        };
        let bytes = ping.to_bytes();
        assert_eq!(bytes.len(), PingMessage::SIZE);
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(PingMessage::decode(&bytes), Ok(ping));
    }

    #[test]
    fn ping_too_short() {
        assert_eq!(
            PingMessage::decode(&[0; 11]),
            Err(DecodeError::TooShort {
                expected: 12,
                actual: 11
            })
        );
    }

    #[test]
    fn fixed_payload_ignores_trailing_bytes() {
        let pong = PongMessage {
            sequence_id: 9,
            timestamp: 10,
            echo_time: 11,
        };
        let mut bytes = pong.to_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF; 4]);
        assert_eq!(PongMessage::decode(&bytes), Ok(pong));
    }

    #[test]
    fn pong_replies_to_ping() {
        let ping = PingMessage {
            sequence_id: 7,
            timestamp: 100,
        };
        let pong = PongMessage::reply_to(&ping, 150);
        assert_eq!(pong.sequence_id, 7);
        assert_eq!(pong.timestamp, 100);
        assert_eq!(pong.echo_time, 150);
    }

    #[test]
    fn echo_bounds() {
        assert!(EchoMessage::new(vec![0u8; 256]).is_ok());
        assert_eq!(
            EchoMessage::new(vec![0u8; 257]),
            Err(DecodeError::LengthOutOfRange {
                length: 257,
                max: 256
            })
        );
    }

    #[test]
    fn echo_declared_length_must_fit() {
        // declares 10 bytes, carries 3
        let bytes = [10, 0, b'a', b'b', b'c'];
        assert_eq!(
            EchoMessage::decode(&bytes),
            Err(DecodeError::LengthMismatch {
                declared: 10,
                available: 3
            })
        );

        let too_long = [0x01, 0x01];
        assert!(matches!(
            EchoMessage::decode(&too_long),
            Err(DecodeError::LengthOutOfRange { length: 257, .. })
        ));
    }

    #[test]
    fn data_round_trip_through_frame() {
        let msg = DataMessage::new(3, 42, &b"payload bytes"[..]).unwrap();
        let frame = msg.to_frame(FrameFlags::ACK_REQUIRED).unwrap();
        let (parsed, _) = deserialize_frame(&frame).unwrap().unwrap();
        assert_eq!(parsed.header.known_type(), Some(MessageType::Data));
        assert!(parsed.header.flags().contains(FrameFlags::ACK_REQUIRED));
        assert_eq!(DataMessage::decode(parsed.payload), Ok(msg));
    }

    #[test]
    fn data_rejects_oversized_length() {
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(&513u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 513]);
        assert!(matches!(
            DataMessage::decode(&bytes),
            Err(DecodeError::LengthOutOfRange { length: 513, max: 512 })
        ));
    }

    #[test]
    fn status_truncates_message() {
        let long = "x".repeat(100);
        let status = StatusMessage::new(1, 500, &long);
        assert_eq!(status.message().len(), StatusMessage::MAX_MESSAGE);

        let mut wire = vec![2, 0x34, 0x12];
        wire.extend_from_slice(long.as_bytes());
        let decoded = StatusMessage::decode(&wire).unwrap();
        assert_eq!(decoded.status_code, 2);
        assert_eq!(decoded.error_code, 0x1234);
        assert_eq!(decoded.message().len(), StatusMessage::MAX_MESSAGE);
    }

    #[test]
    fn status_truncation_respects_char_boundaries() {
        // 31 two-byte characters = 62 bytes, one more would be 64
        let text = "é".repeat(40);
        let status = StatusMessage::new(0, 0, &text);
        assert_eq!(status.message().len(), 62);
        assert!(status.message().chars().all(|c| c == 'é'));
    }

    #[test]
    fn status_without_text() {
        let decoded = StatusMessage::decode(&[0, 0, 0]).unwrap();
        assert_eq!(decoded.message(), "");
        assert!(StatusMessage::decode(&[0, 0]).is_err());
    }

    #[test]
    fn message_enum_dispatches_by_tag() {
        let echo = EchoMessage::new(&b"hello"[..]).unwrap();
        let bytes = echo.to_bytes();
        let decoded = Message::decode(MessageType::Echo, &bytes).unwrap();
        assert_eq!(decoded.message_type(), MessageType::Echo);
        assert_eq!(decoded, Message::from(echo));
    }
}
