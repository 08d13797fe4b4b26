//! Node identity and peer/trust records (spec.md §3 "Node Identity & Peer Record").

use crate::ids::NodeId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hex serde shim for raw key bytes, so peer records stay readable JSON on
/// disk instead of an array of integers.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Trust progression for a peer. Only advances via an explicit
/// confirm/reject transition — never implicitly from activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Discovered but never confirmed.
    Untrusted,
    /// Paired, awaiting enough successful delegations to be trusted.
    Provisional,
    /// Fully trusted for delegation.
    Trusted,
    /// Explicitly blocked; never eligible for delegation.
    Blocked,
}

/// Durable record of one mesh peer, as held in the peer store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeerRecord {
    /// Peer's deterministic node id.
    pub node_id: NodeId,
    /// Fingerprint of the peer's public key (e.g. `sha256` hex of the raw key).
    pub public_key_fingerprint: String,
    /// Raw ed25519 public key bytes, needed to verify signatures from this
    /// peer. Hex-encoded on the wire.
    #[serde(with = "hex_bytes")]
    #[schemars(with = "String")]
    pub public_key: Vec<u8>,
    /// Free-form environment labels (e.g. `"region=us-east"`).
    pub environment_labels: Vec<String>,
    /// Current trust level.
    pub trust_level: TrustLevel,
    /// When this peer was first discovered.
    pub discovered_at: DateTime<Utc>,
    /// When this peer was last observed.
    pub last_seen: DateTime<Utc>,
    /// Last known network address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_address: Option<String>,
    /// Delegations attempted toward this peer.
    pub delegation_count: u64,
    /// Delegations that succeeded.
    pub success_count: u64,
    /// Delegations that failed.
    pub failure_count: u64,
    /// Set when this peer has been quarantined (e.g. by the delegator's
    /// circuit breaker).
    pub quarantined: bool,
    /// Reason for quarantine, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_reason: Option<String>,
}

impl PeerRecord {
    /// A fresh, untrusted record for a newly discovered peer.
    #[must_use]
    pub fn discovered(node_id: NodeId, public_key_fingerprint: impl Into<String>, public_key: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            node_id,
            public_key_fingerprint: public_key_fingerprint.into(),
            public_key,
            environment_labels: Vec::new(),
            trust_level: TrustLevel::Untrusted,
            discovered_at: now,
            last_seen: now,
            last_address: None,
            delegation_count: 0,
            success_count: 0,
            failure_count: 0,
            quarantined: false,
            quarantine_reason: None,
        }
    }

    /// `true` if this peer cannot currently be delegated to, per spec.md §3:
    /// blocked and quarantined peers are never eligible.
    #[must_use]
    pub fn is_delegation_eligible(&self) -> bool {
        self.trust_level != TrustLevel::Blocked && !self.quarantined
    }

    /// Reputation score in `[0.0, 1.0]`: successes over attempts, 1.0 when
    /// no delegations have been attempted yet.
    #[must_use]
    pub fn trust_score(&self) -> f64 {
        if self.delegation_count == 0 {
            1.0
        } else {
            self.success_count as f64 / self.delegation_count as f64
        }
    }

    /// Place this peer under quarantine with a reason.
    pub fn quarantine(&mut self, reason: impl Into<String>) {
        self.quarantined = true;
        self.quarantine_reason = Some(reason.into());
    }

    /// Record a delegation attempt and its outcome.
    pub fn record_delegation(&mut self, succeeded: bool) {
        self.delegation_count += 1;
        if succeeded {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_seen = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_peers_are_never_eligible() {
        let mut p = PeerRecord::discovered(NodeId::from_string("node-a"), "fp", vec![1, 2, 3]);
        p.trust_level = TrustLevel::Trusted;
        assert!(p.is_delegation_eligible());
        p.trust_level = TrustLevel::Blocked;
        assert!(!p.is_delegation_eligible());
    }

    #[test]
    fn quarantine_overrides_trust_level() {
        let mut p = PeerRecord::discovered(NodeId::from_string("node-a"), "fp", vec![1, 2, 3]);
        p.trust_level = TrustLevel::Trusted;
        p.quarantine("cascade detected");
        assert!(!p.is_delegation_eligible());
        assert_eq!(p.quarantine_reason.as_deref(), Some("cascade detected"));
    }

    #[test]
    fn trust_score_is_success_ratio() {
        let mut p = PeerRecord::discovered(NodeId::from_string("node-a"), "fp", vec![1, 2, 3]);
        assert_eq!(p.trust_score(), 1.0);
        p.record_delegation(true);
        p.record_delegation(false);
        assert_eq!(p.trust_score(), 0.5);
    }
}
