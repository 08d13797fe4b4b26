// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-delegator
//!
//! Validates incoming federated delegation requests per spec.md §4.14's
//! fixed check order, with a per-origin failure counter that opens a
//! circuit and quarantines misbehaving origins.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use reach_core::{is_spec_version_supported, NodeId};
use reach_error::{ErrorCode, ReachError};
use reach_pack::ExecutionPack;
use reach_registry::CapabilityRegistry;
use std::collections::HashMap;
use std::sync::RwLock;

/// An incoming request to delegate work from a remote node.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    /// Number of hops this delegation has already traversed.
    pub depth: u32,
    /// Node id the delegation claims to originate from.
    pub origin: NodeId,
    /// Origin's registry snapshot hash at request time.
    pub registry_hash: String,
    /// Spec-version tag the request was constructed under.
    pub spec_version: String,
    /// The pack to execute on behalf of the origin.
    pub pack: ExecutionPack,
}

/// Tunables for [`FederatedDelegator`].
#[derive(Debug, Clone)]
pub struct DelegatorConfig {
    /// Delegation chains deeper than this are rejected.
    pub max_depth: u32,
    /// Consecutive per-origin failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an opened circuit stays open, in seconds.
    pub circuit_open_secs: i64,
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self { max_depth: 5, failure_threshold: 5, circuit_open_secs: 60 }
    }
}

#[derive(Debug, Default)]
struct OriginState {
    failure_count: u32,
    circuit_open_until: Option<DateTime<Utc>>,
    quarantined: bool,
}

/// Delegation lifecycle transitions, for audit logging.
#[derive(Debug, Clone)]
pub enum DelegationEvent<'a> {
    /// A delegation was accepted.
    Accepted { origin: &'a NodeId },
    /// A delegation was rejected; `reason` is the denying error's message.
    Rejected { origin: &'a NodeId, reason: &'a str },
    /// An origin's circuit opened after repeated failures.
    CircuitOpened { origin: &'a NodeId },
    /// An origin was quarantined (e.g. for spec-version incompatibility).
    Quarantined { origin: &'a NodeId, reason: &'a str },
}

/// Receives delegation lifecycle events for audit purposes.
pub trait DelegationAuditSink: Send + Sync {
    /// Record one lifecycle event.
    fn report(&self, event: DelegationEvent<'_>);
}

/// Default audit sink: structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingDelegationAuditSink;

impl DelegationAuditSink for TracingDelegationAuditSink {
    fn report(&self, event: DelegationEvent<'_>) {
        match event {
            DelegationEvent::Accepted { origin } => tracing::info!(%origin, "delegation accepted"),
            DelegationEvent::Rejected { origin, reason } => tracing::warn!(%origin, reason, "delegation rejected"),
            DelegationEvent::CircuitOpened { origin } => tracing::warn!(%origin, "delegation circuit opened"),
            DelegationEvent::Quarantined { origin, reason } => tracing::warn!(%origin, reason, "origin quarantined"),
        }
    }
}

/// Validates incoming delegations and tracks per-origin circuit state.
pub struct FederatedDelegator<A: DelegationAuditSink = TracingDelegationAuditSink> {
    config: DelegatorConfig,
    local_node_id: NodeId,
    origins: RwLock<HashMap<NodeId, OriginState>>,
    audit: A,
}

impl FederatedDelegator<TracingDelegationAuditSink> {
    /// A delegator for `local_node_id` with the default config and a
    /// tracing audit sink.
    #[must_use]
    pub fn new(local_node_id: NodeId) -> Self {
        Self::with_config(local_node_id, DelegatorConfig::default())
    }

    /// A delegator with a custom config and the default tracing audit sink.
    #[must_use]
    pub fn with_config(local_node_id: NodeId, config: DelegatorConfig) -> Self {
        Self { config, local_node_id, origins: RwLock::new(HashMap::new()), audit: TracingDelegationAuditSink }
    }
}

impl<A: DelegationAuditSink> FederatedDelegator<A> {
    /// A delegator with a custom config and audit sink.
    pub fn with_audit(local_node_id: NodeId, config: DelegatorConfig, audit: A) -> Self {
        Self { config, local_node_id, origins: RwLock::new(HashMap::new()), audit }
    }

    /// `true` if `origin` is currently quarantined.
    #[must_use]
    pub fn is_quarantined(&self, origin: &NodeId) -> bool {
        self.origins.read().expect("delegator origins lock poisoned").get(origin).is_some_and(|s| s.quarantined)
    }

    /// Validate `request` per spec.md §4.14's fixed check order: depth,
    /// cancellation, registry hash, self-recursion, spec version, pack
    /// signature, then pack/registry compatibility.
    ///
    /// # Errors
    /// Returns the first failing check. A spec-version mismatch also
    /// quarantines the origin; a registry-compatibility failure increments
    /// its failure counter and may open its circuit.
    pub fn validate(
        &self,
        request: &DelegationRequest,
        registry: &CapabilityRegistry,
        local_registry_hash: &str,
        supported_pack_major: u64,
        cancelled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ReachError> {
        match self.validate_inner(request, registry, local_registry_hash, supported_pack_major, cancelled, now) {
            Ok(()) => {
                self.audit.report(DelegationEvent::Accepted { origin: &request.origin });
                Ok(())
            }
            Err(e) => {
                self.audit.report(DelegationEvent::Rejected { origin: &request.origin, reason: &e.message });
                Err(e)
            }
        }
    }

    fn validate_inner(
        &self,
        request: &DelegationRequest,
        registry: &CapabilityRegistry,
        local_registry_hash: &str,
        supported_pack_major: u64,
        cancelled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ReachError> {
        if let Some(state) = self.origins.read().expect("delegator origins lock poisoned").get(&request.origin) {
            if let Some(until) = state.circuit_open_until {
                if now < until {
                    return Err(ReachError::new(ErrorCode::CircuitOpen, "origin circuit is open"));
                }
            }
        }

        if request.depth >= self.config.max_depth {
            return Err(ReachError::new(ErrorCode::DelegationFailed, "delegation depth exceeds max_depth"));
        }
        if cancelled {
            return Err(ReachError::new(ErrorCode::Cancelled, "delegation context was cancelled"));
        }
        if request.registry_hash != local_registry_hash {
            return Err(ReachError::new(ErrorCode::SpecMismatch, "registry snapshot hash mismatch"));
        }
        if request.origin == self.local_node_id {
            return Err(ReachError::new(ErrorCode::DelegationFailed, "self-recursive delegation rejected"));
        }
        if !is_spec_version_supported(&request.spec_version) {
            self.quarantine(&request.origin, "incompatible spec version");
            return Err(ReachError::new(ErrorCode::SpecVersionIncompatible, "origin spec version incompatible"));
        }
        request.pack.validate_integrity(false)?;
        if let Err(e) = registry.validate_pack_compatibility(&request.pack, supported_pack_major) {
            self.record_failure(&request.origin, now);
            return Err(e);
        }

        Ok(())
    }

    fn quarantine(&self, origin: &NodeId, reason: &str) {
        let mut origins = self.origins.write().expect("delegator origins lock poisoned");
        origins.entry(origin.clone()).or_default().quarantined = true;
        drop(origins);
        self.audit.report(DelegationEvent::Quarantined { origin, reason });
    }

    fn record_failure(&self, origin: &NodeId, now: DateTime<Utc>) {
        let opened = {
            let mut origins = self.origins.write().expect("delegator origins lock poisoned");
            let state = origins.entry(origin.clone()).or_default();
            state.failure_count += 1;
            if state.failure_count >= self.config.failure_threshold {
                state.circuit_open_until = Some(now + Duration::seconds(self.config.circuit_open_secs));
                state.quarantined = true;
                true
            } else {
                false
            }
        };
        if opened {
            self.audit.report(DelegationEvent::CircuitOpened { origin });
            self.audit.report(DelegationEvent::Quarantined { origin, reason: "circuit opened after repeated failures" });
        }
    }
}
