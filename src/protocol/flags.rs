//! Frame flags.
//!
//! Only the bits are defined here; nothing in this crate compresses or
//! encrypts payloads.

use bitflags::bitflags;

bitflags! {
    /// Frame feature flags (8 bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// Sender expects an acknowledgement
        const ACK_REQUIRED = 0b0000_0001;

        /// Payload is compressed
        const COMPRESSED = 0b0000_0010;

        /// Payload is encrypted
        const ENCRYPTED = 0b0000_0100;
    }
}

impl FrameFlags {
    /// Create flags from raw byte value.
    ///
    /// Infallible: bits this version does not know about are retained so they
    /// survive a decode/encode pass untouched.
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    pub const fn to_byte(self) -> u8 {
        self.bits()
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}
