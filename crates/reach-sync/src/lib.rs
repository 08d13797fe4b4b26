// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-sync
//!
//! Offline-first event exchange: each node keeps a vector clock, builds
//! bundles of events a peer doesn't yet have, and applies one of three
//! conflict policies when merging an incoming bundle, per spec.md §4.15.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use reach_core::event::VectorClock;
use reach_core::{Event, EventBundle, NodeId};
use reach_error::{ErrorCode, ReachError};
use reach_peerstore::PeerStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// How an incoming event is accepted when it was not already known by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Always accept.
    AppendOnly,
    /// Accept only if newer than the latest known event from the same source.
    Lww,
    /// Accept only if not causally dominated by what's already known.
    VectorClock,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::VectorClock
    }
}

/// Tunables for [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Max events carried in one outgoing bundle.
    pub bundle_max_events: usize,
    /// Policy applied to incoming events not already known by id.
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { bundle_max_events: 500, conflict_policy: ConflictPolicy::default() }
    }
}

/// Result of merging one incoming bundle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Ids of events newly accepted into the log.
    pub accepted: Vec<String>,
    /// Events skipped because their id was already known.
    pub duplicates: usize,
    /// Events dropped because their own signature failed verification.
    pub signature_rejected: usize,
    /// Events dropped by the configured conflict policy.
    pub policy_dropped: usize,
}

/// `true` if `a` carries causal information `b` lacks: some key in `a` has
/// a strictly higher counter than the corresponding (possibly absent, i.e.
/// zero) entry in `b`.
#[must_use]
pub fn clock_exceeds(a: &VectorClock, b: &VectorClock) -> bool {
    a.iter().any(|(node, &count)| count > b.get(node).copied().unwrap_or(0))
}

/// Merge `other` into `into`, taking the per-key maximum.
pub fn merge_clock(into: &mut VectorClock, other: &VectorClock) {
    for (node, &count) in other {
        let entry = into.entry(node.clone()).or_insert(0);
        if count > *entry {
            *entry = count;
        }
    }
}

fn sign_bytes(signing_key: &SigningKey, bytes: &[u8]) -> String {
    hex::encode(signing_key.sign(bytes).to_bytes())
}

fn event_hash(event: &Event) -> Result<String, ReachError> {
    reach_hash::hash(&event.unsigned())
        .map_err(|e| ReachError::new(ErrorCode::Internal, "failed to hash event").with_source(e))
}

fn bundle_checksum(events: &[Event]) -> Result<String, ReachError> {
    reach_hash::hash(events).map_err(|e| ReachError::new(ErrorCode::Internal, "failed to hash event bundle").with_source(e))
}

fn decode_signature(signature: &str) -> Result<[u8; 64], ReachError> {
    hex::decode(signature)
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "malformed signature hex"))?
        .try_into()
        .map_err(|_| ReachError::new(ErrorCode::SignatureInvalid, "signature is not 64 bytes"))
}

#[derive(Default)]
struct State {
    local_clock: VectorClock,
    known: HashMap<String, Event>,
    peer_clocks: HashMap<NodeId, VectorClock>,
    last_seen_by_source: HashMap<NodeId, DateTime<Utc>>,
}

/// Per-node offline sync engine: local event log, vector clock, and
/// per-peer sync cursors.
pub struct SyncEngine {
    config: SyncConfig,
    local_node_id: NodeId,
    state: RwLock<State>,
}

impl SyncEngine {
    /// A sync engine for `local_node_id` with the default config.
    #[must_use]
    pub fn new(local_node_id: NodeId) -> Self {
        Self::with_config(local_node_id, SyncConfig::default())
    }

    /// A sync engine with a custom config.
    #[must_use]
    pub fn with_config(local_node_id: NodeId, config: SyncConfig) -> Self {
        Self { config, local_node_id, state: RwLock::new(State::default()) }
    }

    /// Record a new local event: increments the local vector clock entry,
    /// attaches the current clock, signs it, and appends it to the log.
    ///
    /// # Errors
    /// Propagates failures hashing the event for signing.
    pub fn record_local_event(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        signing_key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<Event, ReachError> {
        let mut state = self.state.write().expect("sync engine lock poisoned");
        let counter = state.local_clock.entry(self.local_node_id.as_str().to_string()).or_insert(0);
        *counter += 1;
        let vector_clock = state.local_clock.clone();

        let mut event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source_node: self.local_node_id.clone(),
            timestamp: now,
            vector_clock,
            payload,
            signature: None,
        };
        let hash = event_hash(&event)?;
        event.signature = Some(sign_bytes(signing_key, hash.as_bytes()));
        state.known.insert(event.id.clone(), event.clone());
        state.last_seen_by_source.insert(self.local_node_id.clone(), now);
        Ok(event)
    }

    /// The last vector clock known to have been acknowledged by `peer`.
    #[must_use]
    pub fn peer_clock(&self, peer: &NodeId) -> VectorClock {
        self.state.read().expect("sync engine lock poisoned").peer_clocks.get(peer).cloned().unwrap_or_default()
    }

    /// Build a bundle of every known event `peer` doesn't have yet
    /// (capped at `bundle_max_events`, oldest first), sign it, and advance
    /// `peer`'s tracked clock to include what's being sent.
    ///
    /// # Errors
    /// Propagates failures hashing the bundle for signing.
    pub fn build_bundle(&self, peer: &NodeId, signing_key: &SigningKey, now: DateTime<Utc>) -> Result<EventBundle, ReachError> {
        let mut state = self.state.write().expect("sync engine lock poisoned");
        let last_known = state.peer_clocks.get(peer).cloned().unwrap_or_default();

        let mut candidates: Vec<Event> =
            state.known.values().filter(|e| clock_exceeds(&e.vector_clock, &last_known)).cloned().collect();
        candidates.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        if candidates.len() > self.config.bundle_max_events {
            let dropped = candidates.len() - self.config.bundle_max_events;
            tracing::warn!(%peer, dropped, "bundle truncated at bundle_max_events");
            candidates.truncate(self.config.bundle_max_events);
        }

        let mut sent_clock = last_known;
        for event in &candidates {
            merge_clock(&mut sent_clock, &event.vector_clock);
        }
        state.peer_clocks.insert(peer.clone(), sent_clock);

        let checksum = bundle_checksum(&candidates)?;
        let signature = sign_bytes(signing_key, checksum.as_bytes());
        let _ = now;
        Ok(EventBundle { from: self.local_node_id.clone(), to: peer.clone(), events: candidates, checksum, signature: Some(signature) })
    }

    /// Apply an incoming bundle: verify the bundle signature and checksum,
    /// then for each event verify its own signature, skip ones already
    /// known by id, and apply the configured conflict policy.
    ///
    /// # Errors
    /// [`ErrorCode::SignatureMissing`]/[`ErrorCode::SignatureInvalid`] if the
    /// bundle itself is unsigned, tampered, or checksum mismatched. Individual
    /// event failures do not abort the bundle; they're reflected in the
    /// returned [`SyncReport`].
    pub fn receive_bundle(&self, bundle: &EventBundle, peer_store: &PeerStore, now: DateTime<Utc>) -> Result<SyncReport, ReachError> {
        let signature = bundle
            .signature
            .as_deref()
            .ok_or_else(|| ReachError::new(ErrorCode::SignatureMissing, "event bundle has no signature"))?;
        let sig_bytes = decode_signature(signature)?;
        peer_store.verify_peer_signature(&bundle.from, bundle.checksum.as_bytes(), &sig_bytes)?;

        let mut sorted_events = bundle.events.clone();
        sorted_events.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        let recomputed = bundle_checksum(&sorted_events)?;
        if recomputed != bundle.checksum {
            return Err(ReachError::new(ErrorCode::SignatureInvalid, "event bundle checksum mismatch"));
        }

        let mut report = SyncReport::default();
        let mut state = self.state.write().expect("sync engine lock poisoned");

        for event in sorted_events {
            if let Some(sig) = event.signature.as_deref() {
                match decode_signature(sig).and_then(|sig_bytes| {
                    let hash = event_hash(&event)?;
                    peer_store.verify_peer_signature(&event.source_node, hash.as_bytes(), &sig_bytes)
                }) {
                    Ok(()) => {}
                    Err(e) => {
                        tracing::warn!(event_id = %event.id, error = %e.message, "event signature verification failed");
                        report.signature_rejected += 1;
                        continue;
                    }
                }
            } else {
                report.signature_rejected += 1;
                continue;
            }

            if state.known.contains_key(&event.id) {
                report.duplicates += 1;
                continue;
            }

            let accept = match self.config.conflict_policy {
                ConflictPolicy::AppendOnly => true,
                ConflictPolicy::Lww => state
                    .last_seen_by_source
                    .get(&event.source_node)
                    .is_none_or(|latest| event.timestamp > *latest),
                ConflictPolicy::VectorClock => clock_exceeds(&event.vector_clock, &state.local_clock),
            };
            if !accept {
                report.policy_dropped += 1;
                continue;
            }

            merge_clock(&mut state.local_clock, &event.vector_clock);
            state
                .last_seen_by_source
                .entry(event.source_node.clone())
                .and_modify(|t| {
                    if event.timestamp > *t {
                        *t = event.timestamp;
                    }
                })
                .or_insert(event.timestamp);
            report.accepted.push(event.id.clone());
            state.known.insert(event.id.clone(), event);
        }

        let peer_clock = state.peer_clocks.entry(bundle.from.clone()).or_default();
        for event in &bundle.events {
            merge_clock(peer_clock, &event.vector_clock);
        }
        let _ = now;
        Ok(report)
    }
}
