//! Operation codes carried in the frame header.

/// Frame operation code.
///
/// The opcode alone determines how the payload bytes are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client handshake
    Hello = 0x0001,
    /// Server accepted the handshake
    HelloReply = 0x0002,
    /// Error report (handshake rejection or request failure)
    Error = 0x0003,
    /// Keep-alive probe
    KeepAlive = 0x0010,
    /// Keep-alive acknowledgment
    KeepAliveAck = 0x0011,
    /// Directory change notification pushed by the server
    ContactNotify = 0x0020,
    /// Request for the complete directory
    FetchDirectory = 0x0021,
    /// Complete directory snapshot
    DirectorySnapshot = 0x0022,
    /// Message envelope
    Envelope = 0x0030,
    /// Delivery receipt for a previously sent message
    Receipt = 0x0031,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Hello),
            0x0002 => Some(Self::HelloReply),
            0x0003 => Some(Self::Error),
            0x0010 => Some(Self::KeepAlive),
            0x0011 => Some(Self::KeepAliveAck),
            0x0020 => Some(Self::ContactNotify),
            0x0021 => Some(Self::FetchDirectory),
            0x0022 => Some(Self::DirectorySnapshot),
            0x0030 => Some(Self::Envelope),
            0x0031 => Some(Self::Receipt),
            _ => None,
        }
    }

    /// Opcodes that carry no payload bytes.
    #[must_use]
    pub const fn is_empty_payload(self) -> bool {
        matches!(self, Self::KeepAlive | Self::KeepAliveAck | Self::FetchDirectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 10] = [
        Opcode::Hello,
        Opcode::HelloReply,
        Opcode::Error,
        Opcode::KeepAlive,
        Opcode::KeepAliveAck,
        Opcode::ContactNotify,
        Opcode::FetchDirectory,
        Opcode::DirectorySnapshot,
        Opcode::Envelope,
        Opcode::Receipt,
    ];

    #[test]
    fn wire_values_are_stable() {
        for opcode in ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_values_rejected() {
        assert_eq!(Opcode::from_u16(0x0000), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }
}
