//! Wire message type and length-prefixed framing.

use crate::MAX_MESSAGE_BYTES;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use reach_core::NodeId;
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Discriminator for [`Message`] bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake challenge/response exchange.
    Handshake,
    /// Connection liveness probe.
    Ping,
    /// Liveness probe reply.
    Pong,
    /// A batch of offline-sync events.
    EventBundle,
    /// A federated delegation request.
    Delegation,
    /// A response to a prior message.
    Response,
    /// An error report.
    Error,
    /// A task route forwarded for execution.
    TaskRoute,
    /// The result of a previously forwarded task route.
    TaskResult,
}

/// A signed mesh wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id, used for idempotency/dedup on the receiving side.
    pub id: Uuid,
    /// Discriminator for `payload`'s shape.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Sending node.
    pub from: NodeId,
    /// Intended recipient node.
    pub to: NodeId,
    /// Message body.
    pub payload: serde_json::Value,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
    /// Hex ed25519 signature over `{type, from, to, payload, id, timestamp}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Serialize)]
struct SignedFields<'a> {
    #[serde(rename = "type")]
    message_type: MessageType,
    from: &'a NodeId,
    to: &'a NodeId,
    payload: &'a serde_json::Value,
    id: Uuid,
    timestamp: DateTime<Utc>,
}

impl Message {
    fn signed_fields(&self) -> SignedFields<'_> {
        SignedFields {
            message_type: self.message_type,
            from: &self.from,
            to: &self.to,
            payload: &self.payload,
            id: self.id,
            timestamp: self.timestamp,
        }
    }

    fn signable_bytes(&self) -> Result<Vec<u8>, ReachError> {
        reach_hash::canonical_bytes(&self.signed_fields())
            .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to canonicalize message").with_source(e))
    }
}

/// Sign `message` in place over its canonical `{type, from, to, payload,
/// id, timestamp}` subset.
///
/// # Errors
/// Propagates canonicalization failures.
pub fn sign_message(message: &mut Message, signing_key: &SigningKey) -> Result<(), ReachError> {
    let bytes = message.signable_bytes()?;
    let signature = signing_key.sign(&bytes);
    message.signature = Some(hex::encode(signature.to_bytes()));
    Ok(())
}

/// Verify `message`'s signature against `verifying_key`.
///
/// # Errors
/// [`ErrorCode::SignatureMissing`] if unsigned, [`ErrorCode::SignatureInvalid`]
/// if malformed or fails to verify.
pub fn verify_message(message: &Message, verifying_key: &VerifyingKey) -> Result<(), ReachError> {
    let Some(signature_hex) = &message.signature else {
        return Err(ReachError::new(ErrorCode::SignatureMissing, "message carries no signature"));
    };
    let bytes = message.signable_bytes()?;
    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "malformed signature hex"))?
        .try_into()
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "signature is not 64 bytes"))?;
    verifying_key
        .verify(&bytes, &Signature::from_bytes(&sig_bytes))
        .map_err(|e| ReachError::new(ErrorCode::SignatureInvalid, "message signature verification failed").with_source(e))
}

/// Write `message` to `writer` as a 4-byte big-endian length prefix
/// followed by its JSON body.
///
/// # Errors
/// [`ErrorCode::InvalidArgument`] if the encoded body exceeds
/// [`MAX_MESSAGE_BYTES`]; otherwise I/O or serialization failures.
pub async fn write_framed<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<(), ReachError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to serialize message").with_source(e))?;
    if body.len() as u64 > u64::from(MAX_MESSAGE_BYTES) {
        return Err(ReachError::new(ErrorCode::InvalidArgument, "message exceeds transport size cap"));
    }
    writer
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .map_err(|e| ReachError::new(ErrorCode::NodeUnreachable, "failed to write frame length").with_source(e))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| ReachError::new(ErrorCode::NodeUnreachable, "failed to write frame body").with_source(e))?;
    Ok(())
}

/// Read one length-prefixed JSON message from `reader`.
///
/// # Errors
/// [`ErrorCode::InvalidArgument`] if the declared length exceeds
/// [`MAX_MESSAGE_BYTES`]; otherwise I/O or deserialization failures.
pub async fn read_framed<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message, ReachError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ReachError::new(ErrorCode::NodeUnreachable, "failed to read frame length").with_source(e))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_BYTES {
        return Err(ReachError::new(ErrorCode::InvalidArgument, "incoming frame exceeds transport size cap"));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ReachError::new(ErrorCode::NodeUnreachable, "failed to read frame body").with_source(e))?;
    serde_json::from_slice(&body).map_err(|e| ReachError::new(ErrorCode::Internal, "failed to parse frame body").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn sample_message() -> Message {
        Message {
            id: Uuid::nil(),
            message_type: MessageType::Ping,
            from: NodeId::from_string("node-a"),
            to: NodeId::from_string("node-b"),
            payload: serde_json::json!({"seq": 1}),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            signature: None,
        }
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let signing_key = SigningKey::from_bytes(&[1u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let mut message = sample_message();
        sign_message(&mut message, &signing_key).unwrap();
        verify_message(&message, &verifying_key).unwrap();
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signing_key = SigningKey::from_bytes(&[1u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let mut message = sample_message();
        sign_message(&mut message, &signing_key).unwrap();
        message.payload = serde_json::json!({"seq": 2});
        assert_eq!(verify_message(&message, &verifying_key).unwrap_err().code, ErrorCode::SignatureInvalid);
    }

    #[test]
    fn unsigned_message_rejected() {
        let signing_key = SigningKey::from_bytes(&[1u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let message = sample_message();
        assert_eq!(verify_message(&message, &verifying_key).unwrap_err().code, ErrorCode::SignatureMissing);
    }

    #[tokio::test]
    async fn write_then_read_framed_round_trips() {
        let message = sample_message();
        let mut buf: Vec<u8> = Vec::new();
        write_framed(&mut buf, &message).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_framed(&mut cursor).await.unwrap();
        assert_eq!(decoded.id, message.id);
        assert_eq!(decoded.payload, message.payload);
    }

    #[tokio::test]
    async fn oversized_declared_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_framed(&mut cursor).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }
}
