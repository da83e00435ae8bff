//! Fixed 8-byte frame header, parsed in place.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::protocol::{
    errors::{FrameError, Result},
    flags::FrameFlags,
    message_type::MessageType,
};

/// Frame header (little endian).
///
/// ```text
///  0        1        2        3        4        5        6        7
/// ┌────────┬────────┬────────┬────────┬─────────────────┬─────────────────┐
/// │ magic  │version │msg type│ flags  │ payload_length  │    reserved     │
/// │  0xAB  │  0x01  │        │        │     u16 LE      │     u16 LE      │
/// └────────┴────────┴────────┴────────┴─────────────────┴─────────────────┘
/// ```
///
/// Multi-byte fields are byte arrays so the struct has alignment 1 and can be
/// viewed directly over any offset of a read buffer. Every bit pattern is a
/// valid `FrameHeader`; [`FrameHeader::validate`] checks the fixed bytes.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct FrameHeader {
    magic: u8,
    version: u8,
    message_type: u8,
    flags: u8,
    payload_length: [u8; 2],
    reserved: [u8; 2],
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub const MAGIC: u8 = 0xAB;

    pub const VERSION: u8 = 0x01;

    /// Create a header for `payload_length` bytes of `message_type`.
    ///
    /// `message_type` is a raw tag so that frames for types this crate has no
    /// payload codec for can still be built.
    pub fn new(message_type: impl Into<u8>, flags: FrameFlags, payload_length: u16) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            message_type: message_type.into(),
            flags: flags.to_byte(),
            payload_length: payload_length.to_le_bytes(),
            reserved: [0; 2],
        }
    }

    /// Same header with the reserved field set. The codec carries it through
    /// unchanged.
    pub fn with_reserved(mut self, reserved: u16) -> Self {
        self.set_reserved(reserved);
        self
    }

    /// View the first 8 bytes of `bytes` as a header without copying.
    ///
    /// Returns `Ok(None)` while fewer than [`FrameHeader::SIZE`] bytes are
    /// available. A header with the wrong magic or version is an error.
    pub fn parse(bytes: &[u8]) -> Result<Option<&Self>> {
        let Ok((header, _)) = Self::ref_from_prefix(bytes) else {
            return Ok(None);
        };
        header.validate()?;
        Ok(Some(header))
    }

    /// Check the fixed protocol bytes.
    pub fn validate(&self) -> Result<()> {
        if self.magic != Self::MAGIC {
            return Err(FrameError::InvalidMagic(self.magic));
        }
        if self.version != Self::VERSION {
            return Err(FrameError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(self.as_bytes());
        bytes
    }

    pub fn magic(&self) -> u8 {
        self.magic
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw message type tag.
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Message type, if the tag is one this crate knows.
    pub fn known_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_byte(self.flags)
    }

    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags.to_byte();
    }

    pub fn payload_length(&self) -> u16 {
        u16::from_le_bytes(self.payload_length)
    }

    pub fn reserved(&self) -> u16 {
        u16::from_le_bytes(self.reserved)
    }

    pub fn set_reserved(&mut self, reserved: u16) {
        self.reserved = reserved.to_le_bytes();
    }
}

impl fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format_args!("{:#04x}", self.magic))
            .field("version", &self.version)
            .field("message_type", &format_args!("{:#04x}", self.message_type))
            .field("flags", &self.flags())
            .field("payload_length", &self.payload_length())
            .finish()
    }
}
