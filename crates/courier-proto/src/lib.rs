//! Wire protocol for courier.
//!
//! Every message on the persistent connection is a [`Frame`]: a fixed 16-byte
//! binary [`FrameHeader`] followed by a CBOR-encoded [`Payload`] whose type is
//! selected by the header opcode.

pub mod errors;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};

/// ALPN protocol identifier negotiated on every QUIC connection.
pub const ALPN_PROTOCOL: &[u8] = b"courier";
