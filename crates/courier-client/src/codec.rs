//! End-to-end encryption seam.
//!
//! The runtime never looks inside ciphertext. It only needs to know whether
//! an envelope can be opened now or has to wait for its session.

use courier_proto::payloads::message::Envelope;
use thiserror::Error;

/// Codec failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Plaintext could not be encrypted
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Ciphertext is corrupt or forged
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Result of opening an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Envelope opened
    Plaintext(Vec<u8>),
    /// Decryption context for this sender is not available yet
    NeedsSession,
}

/// Opaque encryption capability.
pub trait Codec: Send + Sync + 'static {
    /// Encrypt `plaintext` for every member of `conversation_id`.
    fn encrypt(&self, conversation_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Open an envelope.
    fn decrypt(&self, envelope: &Envelope) -> Result<Decrypted, CodecError>;
}

/// Identity codec. Ciphertext is the plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn encrypt(&self, _conversation_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, envelope: &Envelope) -> Result<Decrypted, CodecError> {
        Ok(Decrypted::Plaintext(envelope.ciphertext.clone()))
    }
}
