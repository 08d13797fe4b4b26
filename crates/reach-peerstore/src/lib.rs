// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-peerstore
//!
//! A durable, JSON-backed trust graph: peer records, reputation counters,
//! quarantine state, and known addresses. Persisted as `trust_store.json`
//! with restrictive file permissions, written via temp-file + rename.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use reach_core::{NodeId, PeerRecord, TrustLevel};
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// On-disk shape of `trust_store.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustStoreFile {
    peers: HashMap<NodeId, PeerRecord>,
    addresses: HashMap<NodeId, Vec<String>>,
}

/// Durable trust graph over mesh peers.
pub struct PeerStore {
    path: Option<PathBuf>,
    state: RwLock<TrustStoreFile>,
}

impl PeerStore {
    /// An in-memory store with no backing file (useful for tests and
    /// ephemeral nodes).
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None, state: RwLock::new(TrustStoreFile::default()) }
    }

    /// Load a store from `path`, or start empty if the file doesn't exist
    /// yet.
    ///
    /// # Errors
    /// [`ErrorCode::StorageReadFailed`] if the file exists but can't be read
    /// or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ReachError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                ReachError::new(ErrorCode::StorageReadFailed, format!("failed to parse {}", path.display())).with_source(e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TrustStoreFile::default(),
            Err(e) => {
                return Err(ReachError::new(ErrorCode::StorageReadFailed, format!("failed to read {}", path.display()))
                    .with_source(e))
            }
        };
        Ok(Self { path: Some(path), state: RwLock::new(state) })
    }

    /// Atomically persist the current state to the backing file, if any,
    /// via temp-file + rename at mode 0644.
    ///
    /// # Errors
    /// [`ErrorCode::StorageWriteFailed`] on any I/O failure.
    pub fn save(&self) -> Result<(), ReachError> {
        let Some(path) = &self.path else { return Ok(()) };
        let state = self.state.read().expect("peer store lock poisoned");
        let json = serde_json::to_string_pretty(&*state)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to serialize trust store").with_source(e))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to create temp file").with_source(e))?;
        use std::io::Write;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to write temp file").with_source(e))?;

        #[cfg(unix)]
        {
            let mut perms = tmp.as_file().metadata().map_err(|e| {
                ReachError::new(ErrorCode::StorageWriteFailed, "failed to stat temp file").with_source(e)
            })?.permissions();
            perms.set_mode(0o644);
            tmp.as_file().set_permissions(perms).map_err(|e| {
                ReachError::new(ErrorCode::StorageWriteFailed, "failed to chmod temp file").with_source(e)
            })?;
        }

        tmp.persist(path)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to persist trust store").with_source(e))?;
        Ok(())
    }

    /// Look up a peer by node id.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<PeerRecord> {
        self.state.read().expect("peer store lock poisoned").peers.get(node_id).cloned()
    }

    /// Insert or replace a peer record.
    pub fn put(&self, record: PeerRecord) {
        self.state.write().expect("peer store lock poisoned").peers.insert(record.node_id.clone(), record);
    }

    /// All known peers.
    #[must_use]
    pub fn list(&self) -> Vec<PeerRecord> {
        self.state.read().expect("peer store lock poisoned").peers.values().cloned().collect()
    }

    /// Peers currently at [`TrustLevel::Trusted`].
    #[must_use]
    pub fn list_trusted(&self) -> Vec<PeerRecord> {
        self.list().into_iter().filter(|p| p.trust_level == TrustLevel::Trusted).collect()
    }

    /// Remove a peer entirely.
    pub fn remove(&self, node_id: &NodeId) {
        let mut state = self.state.write().expect("peer store lock poisoned");
        state.peers.remove(node_id);
        state.addresses.remove(node_id);
    }

    /// Bump `last_seen` to now.
    pub fn update_last_seen(&self, node_id: &NodeId) {
        if let Some(p) = self.state.write().expect("peer store lock poisoned").peers.get_mut(node_id) {
            p.last_seen = Utc::now();
        }
    }

    /// Record a delegation outcome toward `node_id`.
    pub fn record_delegation_result(&self, node_id: &NodeId, success: bool) {
        if let Some(p) = self.state.write().expect("peer store lock poisoned").peers.get_mut(node_id) {
            p.record_delegation(success);
        }
    }

    /// Quarantine a peer with a reason.
    pub fn quarantine(&self, node_id: &NodeId, reason: impl Into<String>) {
        if let Some(p) = self.state.write().expect("peer store lock poisoned").peers.get_mut(node_id) {
            p.quarantine(reason);
        }
    }

    /// `true` if `node_id` is known and quarantined.
    #[must_use]
    pub fn is_quarantined(&self, node_id: &NodeId) -> bool {
        self.get(node_id).is_some_and(|p| p.quarantined)
    }

    /// Verify `signature` over `message` against a peer's stored public key.
    ///
    /// # Errors
    /// [`ErrorCode::StorageNotFound`] if the peer is unknown,
    /// [`ErrorCode::SignatureInvalid`] if the key is malformed or the
    /// signature fails to verify.
    pub fn verify_peer_signature(&self, node_id: &NodeId, message: &[u8], signature: &[u8]) -> Result<(), ReachError> {
        let peer = self
            .get(node_id)
            .ok_or_else(|| ReachError::new(ErrorCode::StorageNotFound, format!("unknown peer {node_id}")))?;
        let key_bytes: [u8; 32] = peer
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "peer public key is not 32 bytes"))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| ReachError::new(ErrorCode::SignatureInvalid, "malformed peer public key").with_source(e))?;
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "signature is not 64 bytes"))?;
        verifying_key
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .map_err(|e| ReachError::new(ErrorCode::SignatureInvalid, "peer signature verification failed").with_source(e))
    }

    /// Known network addresses for a peer.
    #[must_use]
    pub fn get_addresses(&self, node_id: &NodeId) -> Vec<String> {
        self.state.read().expect("peer store lock poisoned").addresses.get(node_id).cloned().unwrap_or_default()
    }

    /// Record an additional known address for a peer, if not already present.
    pub fn add_address(&self, node_id: &NodeId, address: impl Into<String>) {
        let mut state = self.state.write().expect("peer store lock poisoned");
        let entry = state.addresses.entry(node_id.clone()).or_default();
        let address = address.into();
        if !entry.contains(&address) {
            entry.push(address);
        }
    }
}

/// Reputation score in `[0, 100]` per spec.md §4.8: base 50 (75 if
/// explicitly trusted with no delegation history), otherwise
/// `100 * success / total` plus 10 if trusted, clamped.
#[must_use]
pub fn trust_score(peer: &PeerRecord) -> u32 {
    let trusted_bonus = if peer.trust_level == TrustLevel::Trusted { 10 } else { 0 };
    let score = if peer.delegation_count == 0 {
        if peer.trust_level == TrustLevel::Trusted { 75 } else { 50 }
    } else {
        let ratio = 100.0 * peer.success_count as f64 / peer.delegation_count as f64;
        ratio.round() as i64 as u32 + trusted_bonus
    };
    score.clamp(0, 100)
}
