//! Execution envelope / context carried into a pack executor call.

use crate::ids::{CorrelationId, NodeId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything a pack executor call needs beyond the tool name/arguments
/// themselves: identity, provenance, and replay-detection anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionContext {
    /// Autonomous-session id this call belongs to.
    pub session_id: String,
    /// Tenant the run is billed/scoped to.
    pub tenant_id: String,
    /// Agent identity issuing the call.
    pub agent_id: String,
    /// Execution pack id.
    pub pack_id: String,
    /// Execution pack semver.
    pub pack_version: String,
    /// Pack's `signature_hash` at load time.
    pub pack_integrity_hash: String,
    /// Run id (this execution attempt).
    pub run_id: String,
    /// Global run id shared across retries/replays of the same logical run.
    pub global_run_id: String,
    /// Node id that originated the request.
    pub origin_node_id: NodeId,
    /// Node id actually executing the call.
    pub executing_node_id: NodeId,
    /// Hash of the local capability registry snapshot used to validate this
    /// call.
    pub registry_snapshot_hash: String,
    /// Policy version in force at validation time.
    pub policy_version: String,
    /// Spec-version tag the envelope was constructed under.
    pub spec_version: String,
    /// Set when this call is a deterministic replay of a prior run.
    pub is_replay: bool,
    /// Set when the pack demands deterministic execution.
    pub deterministic: bool,
    /// Estimated cost units allocated to this call, if budgeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

impl ExecutionContext {
    /// Validates the replay invariant from spec.md §3: when `is_replay` is
    /// set, `pack_hash` and `registry_snapshot_hash` must match the
    /// executor's local values.
    #[must_use]
    pub fn replay_consistent(&self, local_pack_hash: &str, local_registry_hash: &str) -> bool {
        if !self.is_replay {
            return true;
        }
        self.pack_integrity_hash == local_pack_hash && self.registry_snapshot_hash == local_registry_hash
    }
}

/// A single tool invocation request plus its [`ExecutionContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionEnvelope {
    /// Unique envelope id.
    pub envelope_id: CorrelationId,
    /// Task id this envelope executes.
    pub task_id: String,
    /// Tool name to invoke.
    pub tool_name: String,
    /// Opaque tool arguments.
    pub arguments: serde_json::Value,
    /// Permission ids this call requests.
    pub permissions_requested: Vec<String>,
    /// Full provenance/replay context.
    pub context: ExecutionContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(is_replay: bool, pack_hash: &str, registry_hash: &str) -> ExecutionContext {
        ExecutionContext {
            session_id: "sess-1".into(),
            tenant_id: "tenant-1".into(),
            agent_id: "agent-1".into(),
            pack_id: "pack-1".into(),
            pack_version: "1.0.0".into(),
            pack_integrity_hash: pack_hash.into(),
            run_id: "run-1".into(),
            global_run_id: "run-1".into(),
            origin_node_id: NodeId::from_string("node-a"),
            executing_node_id: NodeId::from_string("node-b"),
            registry_snapshot_hash: registry_hash.into(),
            policy_version: "v1".into(),
            spec_version: crate::SPEC_VERSION.into(),
            is_replay,
            deterministic: true,
            estimated_cost: None,
        }
    }

    #[test]
    fn non_replay_is_always_consistent() {
        let c = ctx(false, "mismatch", "mismatch");
        assert!(c.replay_consistent("local-pack", "local-registry"));
    }

    #[test]
    fn replay_requires_matching_hashes() {
        let matching = ctx(true, "local-pack", "local-registry");
        assert!(matching.replay_consistent("local-pack", "local-registry"));

        let mismatched = ctx(true, "stale-pack", "local-registry");
        assert!(!mismatched.replay_consistent("local-pack", "local-registry"));
    }
}
