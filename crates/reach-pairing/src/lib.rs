// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-pairing
//!
//! Device pairing and mDNS discovery: numeric PIN codes with TTL and
//! single-use consumption, a versioned QR envelope, and signed mDNS
//! announcements with a freshness window.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::Rng;
use reach_core::NodeId;
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration as StdDuration;

/// PIN validity window.
pub const PIN_TTL_SECS: i64 = 5 * 60;
/// mDNS announcement freshness window.
pub const MDNS_FRESHNESS_SECS: i64 = 5 * 60;
/// Interval the expired/used-code cleanup task runs at.
pub const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// A single-use numeric pairing code.
#[derive(Debug, Clone)]
struct PinCode {
    created_at: DateTime<Utc>,
    used: bool,
}

impl PinCode {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= Duration::seconds(PIN_TTL_SECS)
    }
}

/// Generates and consumes numeric pairing codes.
#[derive(Debug, Default)]
pub struct PinStore {
    codes: RwLock<HashMap<String, PinCode>>,
}

impl PinStore {
    /// An empty pin store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh `digits`-long numeric code (must be 4..=12) and
    /// register it with a 5-minute TTL.
    ///
    /// # Errors
    /// [`ErrorCode::InvalidArgument`] if `digits` is outside `4..=12`.
    pub fn generate(&self, digits: u8, now: DateTime<Utc>) -> Result<String, ReachError> {
        if !(4..=12).contains(&digits) {
            return Err(ReachError::new(ErrorCode::InvalidArgument, format!("pin length {digits} outside 4..=12")));
        }
        let mut rng = rand::thread_rng();
        let max: u64 = 10u64.pow(u32::from(digits));
        let code = format!("{:0width$}", rng.gen_range(0..max), width = digits as usize);
        self.codes.write().expect("pin store lock poisoned").insert(code.clone(), PinCode { created_at: now, used: false });
        Ok(code)
    }

    /// Consume `code` if it exists, is unexpired, and hasn't already been
    /// used. Marks it used on success.
    ///
    /// # Errors
    /// [`ErrorCode::StorageNotFound`] if unknown, [`ErrorCode::Timeout`] if
    /// expired, [`ErrorCode::ReplayMismatch`] if already used.
    pub fn consume(&self, code: &str, now: DateTime<Utc>) -> Result<(), ReachError> {
        let mut codes = self.codes.write().expect("pin store lock poisoned");
        let entry = codes
            .get_mut(code)
            .ok_or_else(|| ReachError::new(ErrorCode::StorageNotFound, "unknown pairing code"))?;
        if entry.used {
            return Err(ReachError::new(ErrorCode::ReplayMismatch, "pairing code already used"));
        }
        if entry.is_expired(now) {
            return Err(ReachError::new(ErrorCode::Timeout, "pairing code expired"));
        }
        entry.used = true;
        Ok(())
    }

    /// Remove expired or used codes. Intended to run on [`CLEANUP_INTERVAL`].
    pub fn cleanup(&self, now: DateTime<Utc>) {
        self.codes.write().expect("pin store lock poisoned").retain(|_, c| !c.used && !c.is_expired(now));
    }
}

/// Versioned QR-code pairing envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrEnvelope {
    /// Envelope schema version.
    pub version: u32,
    /// Advertising node's id.
    pub node_id: NodeId,
    /// Advertising node's public key, base64-encoded.
    pub public_key_b64: String,
    /// Free-form device metadata (model, OS, app version...).
    pub device_metadata: serde_json::Value,
    /// When the envelope was generated.
    pub timestamp: DateTime<Utc>,
}

impl QrEnvelope {
    /// Build an envelope for `node_id`/`public_key` at `now`.
    #[must_use]
    pub fn new(node_id: NodeId, public_key: &[u8], device_metadata: serde_json::Value, now: DateTime<Utc>) -> Self {
        use base64::Engine;
        Self {
            version: 1,
            node_id,
            public_key_b64: base64::engine::general_purpose::STANDARD.encode(public_key),
            device_metadata,
            timestamp: now,
        }
    }
}

/// Signed mDNS service announcement: `<nodeid>._reach._tcp.local.`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsAnnouncement {
    /// Advertising node's id.
    pub node_id: NodeId,
    /// First 16 hex chars of `sha256(public_key)`.
    pub public_key_hash_truncated: String,
    /// Advertised capability ids.
    pub capabilities: Vec<String>,
    /// Service port.
    pub port: u16,
    /// When the announcement was signed.
    pub timestamp: DateTime<Utc>,
    /// Hex-encoded ed25519 signature over the canonical hash of the fields
    /// above (with `signature` absent).
    pub signature: String,
}

/// DNS-SD service name for `node_id`, per spec.md §4.9.
#[must_use]
pub fn service_name(node_id: &NodeId) -> String {
    format!("{node_id}._reach._tcp.local.")
}

/// Truncated public-key hash used in TXT records: first 16 hex chars of
/// `sha256(public_key)`.
#[must_use]
pub fn truncated_public_key_hash(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    let full = format!("{:x}", hasher.finalize());
    full[..16].to_string()
}

#[derive(Serialize)]
struct SignedSubset<'a> {
    node_id: &'a NodeId,
    public_key_hash_truncated: &'a str,
    capabilities: &'a [String],
    port: u16,
    timestamp: DateTime<Utc>,
}

impl MdnsAnnouncement {
    fn signed_subset(&self) -> SignedSubset<'_> {
        SignedSubset {
            node_id: &self.node_id,
            public_key_hash_truncated: &self.public_key_hash_truncated,
            capabilities: &self.capabilities,
            port: self.port,
            timestamp: self.timestamp,
        }
    }

    /// Signs a fresh announcement over the canonical field subset.
    pub fn sign(
        node_id: NodeId,
        public_key: &[u8],
        capabilities: Vec<String>,
        port: u16,
        now: DateTime<Utc>,
        signing_key: &ed25519_dalek::SigningKey,
    ) -> Result<Self, ReachError> {
        let unsigned = Self {
            node_id,
            public_key_hash_truncated: truncated_public_key_hash(public_key),
            capabilities,
            port,
            timestamp: now,
            signature: String::new(),
        };
        let bytes = reach_hash::canonical_bytes(&unsigned.signed_subset()).map_err(|e| {
            ReachError::new(ErrorCode::Internal, "failed to canonicalize mdns announcement").with_source(e)
        })?;
        let signature = ed25519_dalek::Signer::sign(signing_key, &bytes);
        Ok(Self { signature: hex::encode(signature.to_bytes()), ..unsigned })
    }

    /// Verifies the announcement's signature and freshness window.
    ///
    /// # Errors
    /// [`ErrorCode::Timeout`] if the timestamp is older than
    /// [`MDNS_FRESHNESS_SECS`], [`ErrorCode::SignatureInvalid`] if the
    /// signature doesn't verify.
    pub fn verify(&self, verifying_key: &VerifyingKey, now: DateTime<Utc>) -> Result<(), ReachError> {
        if now - self.timestamp >= Duration::seconds(MDNS_FRESHNESS_SECS) {
            return Err(ReachError::new(ErrorCode::Timeout, "mdns announcement timestamp too old"));
        }
        let bytes = reach_hash::canonical_bytes(&self.signed_subset()).map_err(|e| {
            ReachError::new(ErrorCode::Internal, "failed to canonicalize mdns announcement").with_source(e)
        })?;
        let sig_bytes: [u8; 64] = hex::decode(&self.signature)
            .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "malformed signature hex"))?
            .try_into()
            .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "signature is not 64 bytes"))?;
        verifying_key
            .verify(&bytes, &Signature::from_bytes(&sig_bytes))
            .map_err(|e| ReachError::new(ErrorCode::SignatureInvalid, "mdns announcement signature invalid").with_source(e))
    }
}
