use std::fmt;

use crate::protocol::errors::FrameError;

/// Message type tag carried in byte 2 of every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0x01,
    Pong = 0x02,
    Echo = 0x03,
    Data = 0x04,
    Status = 0x05,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Echo,
        MessageType::Data,
        MessageType::Status,
    ];

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x03 => Some(Self::Echo),
            0x04 => Some(Self::Data),
            0x05 => Some(Self::Status),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Echo => "ECHO",
            Self::Data => "DATA",
            Self::Status => "STATUS",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(FrameError::UnknownMessageType(value))
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value.to_u8()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
