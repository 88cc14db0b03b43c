//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads are CBOR. The header opcode
//! identifies the payload type, so only the inner struct is serialized (no
//! variant tag).
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness).

pub mod directory;
pub mod message;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Client handshake
    Hello(session::Hello),
    /// Handshake accepted
    HelloReply(session::HelloReply),
    /// Error report
    Error(ErrorPayload),
    /// Keep-alive probe
    KeepAlive,
    /// Keep-alive acknowledgment
    KeepAliveAck,
    /// Directory change notification
    ContactNotify(directory::ContactChangeNotification),
    /// Full directory request (correlated by header request id)
    FetchDirectory,
    /// Full directory response (correlated by header request id)
    DirectorySnapshot(directory::DirectorySnapshot),
    /// Message envelope
    Envelope(message::Envelope),
    /// Delivery receipt
    Receipt(message::Receipt),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
    /// Optional retry-after duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorPayload {
    /// Credentials were rejected.
    pub const AUTH_REJECTED: u16 = 0x0001;
    /// Account exists but is deactivated.
    pub const ACCOUNT_INACTIVE: u16 = 0x0002;
    /// Client protocol version is not supported.
    pub const UNSUPPORTED_VERSION: u16 = 0x0003;
    /// Request was malformed.
    pub const INVALID_PAYLOAD: u16 = 0x0004;
    /// Server-side failure.
    pub const INTERNAL: u16 = 0x0005;

    /// Create an authentication rejection.
    pub fn auth_rejected(reason: impl Into<String>) -> Self {
        Self { code: Self::AUTH_REJECTED, message: reason.into(), retry_after: None }
    }

    /// Create an inactive account error.
    pub fn account_inactive(reason: impl Into<String>) -> Self {
        Self { code: Self::ACCOUNT_INACTIVE, message: reason.into(), retry_after: None }
    }

    /// Create an unsupported version error.
    pub fn unsupported_version(version: u8) -> Self {
        Self {
            code: Self::UNSUPPORTED_VERSION,
            message: format!("unsupported protocol version {version}"),
            retry_after: None,
        }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into(), retry_after: None }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self { code: Self::INTERNAL, message: msg.into(), retry_after: None }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Error(_) => Opcode::Error,
            Self::KeepAlive => Opcode::KeepAlive,
            Self::KeepAliveAck => Opcode::KeepAliveAck,
            Self::ContactNotify(_) => Opcode::ContactNotify,
            Self::FetchDirectory => Opcode::FetchDirectory,
            Self::DirectorySnapshot(_) => Opcode::DirectorySnapshot,
            Self::Envelope(_) => Opcode::Envelope,
            Self::Receipt(_) => Opcode::Receipt,
        }
    }

    /// Encode payload to buffer
    ///
    /// Serializes only the inner struct, not the variant tag. Size limits are
    /// enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::KeepAlive | Self::KeepAliveAck | Self::FetchDirectory => Ok(()),
            Self::ContactNotify(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::DirectorySnapshot(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Envelope(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Receipt(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes based on opcode
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(from_cbor(bytes)?),
            Opcode::HelloReply => Self::HelloReply(from_cbor(bytes)?),
            Opcode::Error => Self::Error(from_cbor(bytes)?),
            Opcode::KeepAlive => Self::KeepAlive,
            Opcode::KeepAliveAck => Self::KeepAliveAck,
            Opcode::ContactNotify => Self::ContactNotify(from_cbor(bytes)?),
            Opcode::FetchDirectory => Self::FetchDirectory,
            Opcode::DirectorySnapshot => Self::DirectorySnapshot(from_cbor(bytes)?),
            Opcode::Envelope => Self::Envelope(from_cbor(bytes)?),
            Opcode::Receipt => Self::Receipt(from_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame, setting the header opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Frame with a fresh header and no request id.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn to_frame(self) -> Result<Frame> {
        let header = FrameHeader::new(self.opcode());
        self.into_frame(header)
    }

    /// Parse payload from a raw transport frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is not recognized
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
