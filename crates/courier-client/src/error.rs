//! Runtime error types.

use courier_core::ConnError;
use courier_proto::ProtocolError;
use courier_store::StoreError;
use thiserror::Error;

use crate::codec::CodecError;

/// Directory sync errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Full directory fetch failed; the applied version did not move
    #[error("full resync failed: {0}")]
    ResyncFailed(String),

    /// Storage rejected a directory write
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The sync worker is no longer running
    #[error("directory sync engine shut down")]
    ShutDown,
}

/// Message routing errors.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Encryption or decryption failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Storage rejected the write
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// Message could not be handed to the transport
    #[error("send failed: {0}")]
    Connection(#[from] ConnError),

    /// Frame could not be built or parsed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
