//! Correlation id and node id primitives.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 128-bit opaque identifier present on every log entry and task route.
///
/// Preserved verbatim as work crosses node boundaries, so a single
/// correlation id threads through every log line and route hop belonging
/// to one logical chain of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID as a correlation id (e.g. parsed off the wire).
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Borrow the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic node identity: `sha256(pubkey || hostname)`, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Derive a node id from a raw public key and hostname, per spec.md §3:
    /// `sha256(pubkey || hostname)`.
    #[must_use]
    pub fn derive(pubkey: &[u8], hostname: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(pubkey);
        hasher.update(hostname.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already-computed id string (e.g. loaded from disk).
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_deterministic() {
        let a = NodeId::derive(b"pubkey-bytes", "host-a");
        let b = NodeId::derive(b"pubkey-bytes", "host-a");
        assert_eq!(a, b);
    }

    #[test]
    fn node_id_differs_per_hostname() {
        let a = NodeId::derive(b"pubkey-bytes", "host-a");
        let b = NodeId::derive(b"pubkey-bytes", "host-b");
        assert_ne!(a, b);
    }

    #[test]
    fn correlation_id_survives_roundtrip() {
        let c = CorrelationId::new();
        let json = serde_json::to_string(&c).unwrap();
        let back: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
