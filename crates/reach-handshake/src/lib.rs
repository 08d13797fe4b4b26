// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-handshake
//!
//! Per-session challenge/response handshake: nonce-replay prevention and
//! compatibility checks (registry snapshot hash, policy version) ahead of
//! session token issuance.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use reach_core::NodeId;
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;

/// Default challenge validity window.
pub const CHALLENGE_TTL_SECS: i64 = 5 * 60;
/// Default session token validity window once issued.
pub const SESSION_TOKEN_TTL_SECS: i64 = 60 * 60;

/// A handshake challenge issued to a connecting peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// 32 random bytes, base64-encoded.
    pub nonce: String,
    /// Issuer's current policy version.
    pub policy_version: String,
    /// Issuer's current registry snapshot hash.
    pub registry_snapshot_hash: String,
    /// When the challenge was issued.
    pub issued_at: DateTime<Utc>,
}

impl Challenge {
    /// Issue a fresh challenge at `now`.
    #[must_use]
    pub fn new(policy_version: impl Into<String>, registry_snapshot_hash: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut nonce_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        Self {
            nonce: base64::engine::general_purpose::STANDARD.encode(nonce_bytes),
            policy_version: policy_version.into(),
            registry_snapshot_hash: registry_snapshot_hash.into(),
            issued_at: now,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at <= Duration::seconds(CHALLENGE_TTL_SECS)
    }
}

/// The responder's capability snapshot, advertised alongside its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityAdvertisement {
    /// Responder's registry snapshot hash at response time.
    pub registry_snapshot_hash: String,
    /// Responder's policy version at response time.
    pub policy_version: String,
    /// Capability ids the responder supports.
    pub capability_ids: Vec<String>,
}

impl CapabilityAdvertisement {
    fn snapshot_hash(&self) -> Result<String, ReachError> {
        reach_hash::hash(self).map_err(|e| {
            ReachError::new(ErrorCode::Internal, "failed to hash capability advertisement").with_source(e)
        })
    }
}

/// A peer's response to a [`Challenge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// The challenge being answered.
    pub challenge: Challenge,
    /// Responder's capability advertisement.
    pub capability_advertisement: CapabilityAdvertisement,
    /// Responder's claimed node id.
    pub node_id: NodeId,
    /// Hex ed25519 signature over
    /// `"nonce|policy|registry|caps_hash|caps_registry|node_id"`.
    pub signature: String,
    /// Hex ed25519 signature over the capability advertisement's own hash.
    pub capability_snapshot_signature: String,
}

/// Builds the exact byte string `Verify` re-signs and compares against.
fn signing_message(challenge: &Challenge, caps: &CapabilityAdvertisement, node_id: &NodeId, caps_hash: &str) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        challenge.nonce, challenge.policy_version, challenge.registry_snapshot_hash, caps_hash, caps.registry_snapshot_hash, node_id
    )
}

/// Random, opaque session credential issued on a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    /// Hex-encoded 24 random bytes.
    pub value: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    fn issue(now: DateTime<Utc>, ttl_secs: i64) -> Self {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { value: hex::encode(bytes), issued_at: now, expires_at: now + Duration::seconds(ttl_secs) }
    }

    /// `true` once `now` has passed [`Self::expires_at`].
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Handshake lifecycle events, for audit logging.
#[derive(Debug, Clone)]
pub enum HandshakeEvent<'a> {
    /// A challenge was issued.
    Started { node_id: &'a NodeId },
    /// Verification succeeded and a session token was issued.
    Completed { node_id: &'a NodeId },
    /// Verification failed.
    Failed { node_id: &'a NodeId, reason: &'a str },
}

/// Receives handshake lifecycle events for audit purposes.
pub trait HandshakeAuditSink: Send + Sync {
    /// Record one lifecycle event.
    fn report(&self, event: HandshakeEvent<'_>);
}

/// Default audit sink: structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl HandshakeAuditSink for TracingAuditSink {
    fn report(&self, event: HandshakeEvent<'_>) {
        match event {
            HandshakeEvent::Started { node_id } => tracing::info!(%node_id, "handshake started"),
            HandshakeEvent::Completed { node_id } => tracing::info!(%node_id, "handshake completed"),
            HandshakeEvent::Failed { node_id, reason } => tracing::warn!(%node_id, reason, "handshake failed"),
        }
    }
}

/// Issues challenges, verifies responses, and guards against signature
/// replay.
pub struct Handshaker<A: HandshakeAuditSink = TracingAuditSink> {
    seen_signatures: RwLock<HashSet<String>>,
    session_ttl_secs: i64,
    audit: A,
}

impl Handshaker<TracingAuditSink> {
    /// A handshaker with the default session TTL and a tracing audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self { seen_signatures: RwLock::new(HashSet::new()), session_ttl_secs: SESSION_TOKEN_TTL_SECS, audit: TracingAuditSink }
    }
}

impl Default for Handshaker<TracingAuditSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: HandshakeAuditSink> Handshaker<A> {
    /// A handshaker with a custom audit sink and session TTL.
    pub fn with_audit(audit: A, session_ttl_secs: i64) -> Self {
        Self { seen_signatures: RwLock::new(HashSet::new()), session_ttl_secs, audit }
    }

    /// Issue a fresh challenge and emit a `Started` audit event.
    pub fn issue_challenge(
        &self,
        expected_node_id: &NodeId,
        policy_version: impl Into<String>,
        registry_snapshot_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Challenge {
        self.audit.report(HandshakeEvent::Started { node_id: expected_node_id });
        Challenge::new(policy_version, registry_snapshot_hash, now)
    }

    /// Verify a [`HandshakeResponse`] against `expected_node_id` and
    /// `verifying_key`, per spec.md §4.10's check order: node id equality,
    /// challenge freshness, registry hash match, policy version match,
    /// ed25519 signature, then replay.
    ///
    /// # Errors
    /// Returns a [`ReachError`] on the first failing check, and emits a
    /// `Failed` audit event before returning.
    pub fn verify(
        &self,
        expected_node_id: &NodeId,
        response: &HandshakeResponse,
        verifying_key: &VerifyingKey,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, ReachError> {
        if let Err(e) = self.verify_inner(expected_node_id, response, verifying_key, now) {
            self.audit.report(HandshakeEvent::Failed { node_id: expected_node_id, reason: &e.message });
            return Err(e);
        }
        self.audit.report(HandshakeEvent::Completed { node_id: expected_node_id });
        Ok(SessionToken::issue(now, self.session_ttl_secs))
    }

    fn verify_inner(
        &self,
        expected_node_id: &NodeId,
        response: &HandshakeResponse,
        verifying_key: &VerifyingKey,
        now: DateTime<Utc>,
    ) -> Result<(), ReachError> {
        if &response.node_id != expected_node_id {
            return Err(ReachError::new(ErrorCode::InvalidArgument, "handshake response node id mismatch"));
        }
        if !response.challenge.is_fresh(now) {
            return Err(ReachError::new(ErrorCode::Timeout, "handshake challenge expired"));
        }
        if response.capability_advertisement.registry_snapshot_hash != response.challenge.registry_snapshot_hash {
            return Err(ReachError::new(ErrorCode::SpecMismatch, "registry snapshot hash mismatch"));
        }
        if response.capability_advertisement.policy_version != response.challenge.policy_version {
            return Err(ReachError::new(ErrorCode::SpecMismatch, "policy version mismatch"));
        }

        let caps_hash = response.capability_advertisement.snapshot_hash()?;
        let message = signing_message(&response.challenge, &response.capability_advertisement, &response.node_id, &caps_hash);
        verify_signature(verifying_key, message.as_bytes(), &response.signature)?;
        verify_signature(verifying_key, caps_hash.as_bytes(), &response.capability_snapshot_signature)?;

        let mut seen = self.seen_signatures.write().expect("handshake replay table lock poisoned");
        if !seen.insert(response.signature.clone()) {
            return Err(ReachError::new(ErrorCode::ReplayMismatch, "handshake response signature replayed"));
        }
        Ok(())
    }
}

fn verify_signature(verifying_key: &VerifyingKey, message: &[u8], signature_hex: &str) -> Result<(), ReachError> {
    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "malformed signature hex"))?
        .try_into()
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "signature is not 64 bytes"))?;
    verifying_key
        .verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|e| ReachError::new(ErrorCode::SignatureInvalid, "handshake signature verification failed").with_source(e))
}

/// Signs a [`Challenge`] + [`CapabilityAdvertisement`] pair into a complete
/// [`HandshakeResponse`], as the responding peer would.
pub fn respond(
    challenge: Challenge,
    capability_advertisement: CapabilityAdvertisement,
    node_id: NodeId,
    signing_key: &ed25519_dalek::SigningKey,
) -> Result<HandshakeResponse, ReachError> {
    use ed25519_dalek::Signer;
    let caps_hash = capability_advertisement.snapshot_hash()?;
    let message = signing_message(&challenge, &capability_advertisement, &node_id, &caps_hash);
    let signature = signing_key.sign(message.as_bytes());
    let capability_snapshot_signature = signing_key.sign(caps_hash.as_bytes());
    Ok(HandshakeResponse {
        challenge,
        capability_advertisement,
        node_id,
        signature: hex::encode(signature.to_bytes()),
        capability_snapshot_signature: hex::encode(capability_snapshot_signature.to_bytes()),
    })
}
