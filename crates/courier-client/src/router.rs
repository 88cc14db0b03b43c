//! Message routing between the transport, the codec and the message store.
//!
//! Inbound envelopes are stored at most once per message id. Envelopes the
//! codec cannot open yet are parked as pending rows and promoted later by
//! [`MessageRouter::retry_pending`]. Outbound messages are persisted before
//! they touch the network so a crash never loses a draft.

use std::sync::Arc;

use courier_core::model::{MessageContent, MessageRecord, PendingMessage, SendStatus};
use courier_proto::{
    Opcode, Payload,
    payloads::message::{Envelope, Receipt, ReceiptKind},
};
use courier_store::{MessageStore, StoreError};

use crate::{
    codec::{Codec, CodecError, Decrypted},
    error::MessageError,
    transport::Transport,
};

/// What happened to an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Decrypted and stored
    Stored,
    /// Message id already stored; nothing written
    Duplicate,
    /// Parked until the codec has a session for the sender
    Pending,
}

/// Outcome of a pending retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Pending rows turned into messages
    pub promoted: usize,
    /// Rows that still cannot be opened
    pub still_pending: usize,
    /// Rows dropped as undecodable
    pub discarded: usize,
}

/// Routes messages for one local account.
pub struct MessageRouter<S, C, T> {
    store: S,
    codec: Arc<C>,
    transport: Arc<T>,
    local_id: String,
}

impl<S: Clone, C, T> Clone for MessageRouter<S, C, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codec: Arc::clone(&self.codec),
            transport: Arc::clone(&self.transport),
            local_id: self.local_id.clone(),
        }
    }
}

impl<S, C, T> MessageRouter<S, C, T>
where
    S: MessageStore,
    C: Codec,
    T: Transport,
{
    /// Router sending as `local_id`.
    pub fn new(store: S, codec: Arc<C>, transport: Arc<T>, local_id: impl Into<String>) -> Self {
        Self { store, codec, transport, local_id: local_id.into() }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decrypt and store an inbound envelope.
    ///
    /// Redelivered envelopes are detected by message id and leave the stored
    /// row untouched.
    ///
    /// # Errors
    ///
    /// - `MessageError::Codec` if the ciphertext is corrupt
    /// - `MessageError::Storage` if the write failed
    pub fn handle_envelope(&self, envelope: Envelope) -> Result<Inbound, MessageError> {
        match self.codec.decrypt(&envelope)? {
            Decrypted::Plaintext(plaintext) => {
                let record = inbound_record(&envelope, plaintext)?;
                let inserted = self.store.put_when_non_exist(std::slice::from_ref(&record))?;

                if inserted == 0 {
                    tracing::debug!(message_id = %envelope.message_id, "duplicate envelope");
                    return Ok(Inbound::Duplicate);
                }

                tracing::debug!(
                    message_id = %envelope.message_id,
                    conversation_id = %envelope.conversation_id,
                    "message stored"
                );
                Ok(Inbound::Stored)
            },
            Decrypted::NeedsSession => {
                if self.store.load_message(&envelope.message_id)?.is_some() {
                    return Ok(Inbound::Duplicate);
                }

                let mut raw_envelope = Vec::new();
                let message_id = envelope.message_id.clone();
                let original_timestamp = envelope.timestamp;
                Payload::Envelope(envelope).encode(&mut raw_envelope)?;

                self.store.save_pending_message(&PendingMessage {
                    message_id: message_id.clone(),
                    original_timestamp,
                    raw_envelope,
                })?;

                tracing::debug!(%message_id, "envelope parked until session is available");
                Ok(Inbound::Pending)
            },
        }
    }

    /// Retry up to `limit` pending envelopes, oldest first.
    ///
    /// Failures are isolated per row.
    ///
    /// # Errors
    ///
    /// - `MessageError::Storage` if the pending rows cannot be listed
    pub fn retry_pending(&self, limit: usize) -> Result<RetryReport, MessageError> {
        let mut report = RetryReport::default();

        for pending in self.store.pending_messages(limit)? {
            match self.retry_one(&pending) {
                Ok(Some(true)) => report.promoted += 1,
                Ok(Some(false)) => report.still_pending += 1,
                Ok(None) => report.discarded += 1,
                Err(e) => {
                    tracing::warn!(
                        message_id = %pending.message_id,
                        error = %e,
                        "pending retry failed"
                    );
                    report.still_pending += 1;
                },
            }
        }

        if report != RetryReport::default() {
            tracing::debug!(
                promoted = report.promoted,
                still_pending = report.still_pending,
                discarded = report.discarded,
                "pending retry pass"
            );
        }

        Ok(report)
    }

    /// `Some(true)` promoted, `Some(false)` still pending, `None` discarded.
    fn retry_one(&self, pending: &PendingMessage) -> Result<Option<bool>, MessageError> {
        let envelope = match Payload::decode(Opcode::Envelope, &pending.raw_envelope) {
            Ok(Payload::Envelope(envelope)) => envelope,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    message_id = %pending.message_id,
                    "dropping undecodable pending envelope"
                );
                self.store.discard_pending(&pending.message_id)?;
                return Ok(None);
            },
        };

        let opened = self.codec.decrypt(&envelope).and_then(|opened| match opened {
            Decrypted::Plaintext(plaintext) => inbound_record(&envelope, plaintext).map(Some),
            Decrypted::NeedsSession => Ok(None),
        });

        match opened {
            Ok(Some(record)) => {
                self.store.promote_pending(&pending.message_id, &record)?;
                Ok(Some(true))
            },
            Ok(None) => Ok(Some(false)),
            Err(e) => {
                tracing::warn!(
                    message_id = %pending.message_id,
                    error = %e,
                    "dropping corrupt pending envelope"
                );
                self.store.discard_pending(&pending.message_id)?;
                Ok(None)
            },
        }
    }

    /// Persist, encrypt and send a text message.
    ///
    /// The message is stored as `Pending` first and ends up `Sent` or
    /// `Failed`.
    ///
    /// # Errors
    ///
    /// - `MessageError::Connection` if the transport refused the frame (the
    ///   stored message is `Failed`)
    /// - `MessageError::Codec` or `MessageError::Storage` otherwise
    pub async fn send_text(
        &self,
        conversation_id: &str,
        body: &str,
        timestamp: u64,
    ) -> Result<MessageRecord, MessageError> {
        let message_id = format!("{:032x}", rand::random::<u128>());
        let sender_id = self.local_id.as_str();
        let record = MessageRecord::text(message_id, conversation_id, sender_id, timestamp, body);

        self.store.put_messages(std::slice::from_ref(&record))?;
        self.deliver(record).await
    }

    /// Send a `Failed` (or interrupted `Pending`) message again.
    ///
    /// # Errors
    ///
    /// - `MessageError::Storage` with `StoreError::NotFound` for unknown ids
    ///   and `StoreError::Conflict` for messages already sent
    pub async fn resend(&self, message_id: &str) -> Result<MessageRecord, MessageError> {
        let record = self
            .store
            .load_message(message_id)?
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;

        self.store.update_send_status(&record, SendStatus::Pending)?;
        self.deliver(record.with_status(SendStatus::Pending)).await
    }

    async fn deliver(&self, record: MessageRecord) -> Result<MessageRecord, MessageError> {
        let MessageContent::Text(body) = &record.content else {
            return Err(CodecError::Encrypt("message has no plaintext body".to_string()).into());
        };

        let ciphertext = self.codec.encrypt(&record.conversation_id, body.as_bytes())?;
        let frame = Payload::Envelope(Envelope {
            message_id: record.id.clone(),
            conversation_id: record.conversation_id.clone(),
            sender_id: record.sender_id.clone(),
            timestamp: record.timestamp,
            ciphertext,
        })
        .to_frame()?;

        match self.transport.send(frame).await {
            Ok(()) => {
                let status = match self.store.update_send_status(&record, SendStatus::Sent) {
                    Ok(status) => status,
                    // A receipt got there first
                    Err(StoreError::Conflict(reason)) => {
                        tracing::debug!(message_id = %record.id, %reason, "status already ahead");
                        self.store
                            .load_message(&record.id)?
                            .map_or(SendStatus::Sent, |stored| stored.send_status)
                    },
                    Err(e) => return Err(e.into()),
                };
                tracing::debug!(message_id = %record.id, ?status, "message sent");
                Ok(record.with_status(status))
            },
            Err(e) => {
                tracing::warn!(message_id = %record.id, error = %e, "message send failed");
                self.store.update_send_status(&record, SendStatus::Failed)?;
                Err(e.into())
            },
        }
    }

    /// Apply a delivery receipt.
    ///
    /// Returns the stored status, or `None` when the receipt was ignored
    /// (unknown message or a status regression such as `Accepted` after
    /// `Delivered`).
    ///
    /// # Errors
    ///
    /// - `MessageError::Storage` if the store failed
    pub fn handle_receipt(&self, receipt: &Receipt) -> Result<Option<SendStatus>, MessageError> {
        let Some(record) = self.store.load_message(&receipt.message_id)? else {
            tracing::debug!(message_id = %receipt.message_id, "receipt for unknown message");
            return Ok(None);
        };

        let status = match receipt.kind {
            ReceiptKind::Accepted => SendStatus::Sent,
            ReceiptKind::Delivered => SendStatus::Delivered,
        };

        match self.store.update_send_status(&record, status) {
            Ok(stored) => Ok(Some(stored)),
            Err(StoreError::Conflict(reason)) => {
                tracing::debug!(message_id = %receipt.message_id, %reason, "ignoring late receipt");
                Ok(None)
            },
            Err(e) => Err(e.into()),
        }
    }
}

fn inbound_record(envelope: &Envelope, plaintext: Vec<u8>) -> Result<MessageRecord, CodecError> {
    let body = String::from_utf8(plaintext)
        .map_err(|e| CodecError::Decrypt(format!("plaintext is not UTF-8: {e}")))?;

    Ok(MessageRecord::text(
        envelope.message_id.clone(),
        envelope.conversation_id.clone(),
        envelope.sender_id.clone(),
        envelope.timestamp,
        body,
    )
    .with_status(SendStatus::Delivered))
}

#[cfg(test)]
mod tests {
    use courier_store::MemoryStorage;

    use super::*;
    use crate::{codec::PassthroughCodec, transport::MemoryTransport};

    fn envelope(id: &str, body: &str) -> Envelope {
        Envelope {
            message_id: id.to_string(),
            conversation_id: "room".to_string(),
            sender_id: "bob".to_string(),
            timestamp: 100,
            ciphertext: body.as_bytes().to_vec(),
        }
    }

    fn router() -> MessageRouter<MemoryStorage, PassthroughCodec, MemoryTransport> {
        let (transport, _peer, _events) = MemoryTransport::pair("mem");
        let transport = Arc::new(transport);
        MessageRouter::new(MemoryStorage::new(), Arc::new(PassthroughCodec), transport, "me")
    }

    #[test]
    fn redelivered_envelope_keeps_first_copy() {
        let router = router();

        assert_eq!(router.handle_envelope(envelope("m1", "first")).unwrap(), Inbound::Stored);
        assert_eq!(router.handle_envelope(envelope("m1", "second")).unwrap(), Inbound::Duplicate);

        let stored = router.store().load_message("m1").unwrap().unwrap();
        assert_eq!(stored.content, MessageContent::Text("first".into()));
    }

    #[test]
    fn non_utf8_plaintext_is_rejected() {
        let router = router();
        let mut bad = envelope("m1", "");
        bad.ciphertext = vec![0xff, 0xfe];

        assert!(matches!(router.handle_envelope(bad), Err(MessageError::Codec(_))));
        assert!(router.store().load_message("m1").unwrap().is_none());
    }

    /// Applies a `Delivered` receipt for every envelope before `send` returns.
    struct ReceiptFirst {
        store: MemoryStorage,
    }

    #[async_trait::async_trait]
    impl Transport for ReceiptFirst {
        async fn connect(&self) -> Result<(), courier_core::ConnError> {
            Ok(())
        }

        async fn send(&self, frame: courier_proto::Frame) -> Result<(), courier_core::ConnError> {
            let Ok(Payload::Envelope(envelope)) = Payload::from_frame(&frame) else {
                return Ok(());
            };
            let record = self.store.load_message(&envelope.message_id).unwrap().unwrap();
            self.store.update_send_status(&record, SendStatus::Delivered).unwrap();
            Ok(())
        }

        async fn close(&self, _reason: &str) {}

        fn is_connected(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "receipt-first"
        }
    }

    #[tokio::test]
    async fn receipt_racing_send_keeps_delivered() {
        let store = MemoryStorage::new();
        let transport = Arc::new(ReceiptFirst { store: store.clone() });
        let router = MessageRouter::new(store.clone(), Arc::new(PassthroughCodec), transport, "me");

        let sent = router.send_text("bob", "hello", 1).await.unwrap();

        assert_eq!(sent.send_status, SendStatus::Delivered);
        let stored = store.load_message(&sent.id).unwrap().unwrap();
        assert_eq!(stored.send_status, SendStatus::Delivered);
    }

    #[test]
    fn receipt_for_unknown_message_is_ignored() {
        let router = router();
        let receipt = Receipt { message_id: "nope".into(), kind: ReceiptKind::Delivered };

        assert_eq!(router.handle_receipt(&receipt).unwrap(), None);
    }
}
