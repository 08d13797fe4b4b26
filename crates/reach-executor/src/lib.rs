// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-executor
//!
//! Wraps a delegate executor and re-validates pack, spec-version, and
//! replay-snapshot invariants on every call. The delegate is never invoked
//! when a check fails.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use reach_core::{is_spec_version_supported, ExecutionEnvelope, SPEC_VERSION};
use reach_error::{ErrorCode, ReachError};
use reach_pack::ExecutionPack;

/// A result returned by a pack execution, success or policy/invariant
/// failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Opaque success payload, present only when `error` is `None`.
    pub output: Option<serde_json::Value>,
    /// Set when the call was rejected before reaching the delegate.
    pub error: Option<ReachError>,
}

impl ExecutionResult {
    fn ok(output: serde_json::Value) -> Self {
        Self { output: Some(output), error: None }
    }

    fn err(error: ReachError) -> Self {
        Self { output: None, error: Some(error) }
    }

    /// `true` when this result represents a rejected/failed call.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The underlying executor that actually performs tool side effects. The
/// pack executor never calls this unless every invariant check passes.
#[async_trait]
pub trait DelegateExecutor: Send + Sync {
    /// Run one tool invocation described by `envelope`.
    async fn execute(&self, envelope: &ExecutionEnvelope) -> Result<serde_json::Value, ReachError>;
}

/// Observes invariant violations the pack executor rejects before they
/// reach the delegate. Implementations typically forward into tracing or
/// an audit sink.
pub trait InvariantReporter: Send + Sync {
    /// Called once per rejected call, with the invariant code and a
    /// human-readable description.
    fn report(&self, code: ErrorCode, detail: &str);
}

/// Reports invariant violations via `tracing::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInvariantReporter;

impl InvariantReporter for TracingInvariantReporter {
    fn report(&self, code: ErrorCode, detail: &str) {
        tracing::warn!(code = code.as_str(), detail, "pack executor rejected call");
    }
}

/// Wraps a [`DelegateExecutor`] with the pack-level invariant checks from
/// spec.md §4.5.
pub struct PackExecutor<D, R = TracingInvariantReporter> {
    delegate: D,
    pack: ExecutionPack,
    /// Registry snapshot hash this executor was constructed with, if any.
    snapshot_hash: Option<String>,
    reporter: R,
}

impl<D: DelegateExecutor> PackExecutor<D, TracingInvariantReporter> {
    /// Build an executor for `pack`, reporting violations via tracing.
    pub fn new(delegate: D, pack: ExecutionPack, snapshot_hash: Option<String>) -> Self {
        Self { delegate, pack, snapshot_hash, reporter: TracingInvariantReporter }
    }
}

impl<D: DelegateExecutor, R: InvariantReporter> PackExecutor<D, R> {
    /// Build an executor for `pack` with a custom invariant reporter.
    pub fn with_reporter(delegate: D, pack: ExecutionPack, snapshot_hash: Option<String>, reporter: R) -> Self {
        Self { delegate, pack, snapshot_hash, reporter }
    }

    /// Run the six-step validation order, then delegate on success.
    pub async fn execute(&self, mut envelope: ExecutionEnvelope) -> ExecutionResult {
        if let Err(e) = self.check(&envelope) {
            self.reporter.report(e.code, &e.message);
            return ExecutionResult::err(e);
        }

        envelope.context.pack_id = self.pack.id.clone();
        envelope.context.pack_version = self.pack.version.clone();
        envelope.context.spec_version = SPEC_VERSION.to_string();

        match self.delegate.execute(&envelope).await {
            Ok(output) => ExecutionResult::ok(output),
            Err(e) => ExecutionResult::err(e),
        }
    }

    fn check(&self, envelope: &ExecutionEnvelope) -> Result<(), ReachError> {
        if !is_spec_version_supported(&envelope.context.spec_version) {
            return Err(ReachError::new(
                ErrorCode::SpecVersionIncompatible,
                format!("envelope spec version {} unsupported", envelope.context.spec_version),
            ));
        }
        if envelope.context.pack_id != self.pack.id {
            return Err(ReachError::new(
                ErrorCode::PackMismatch,
                format!("envelope pack id {} does not match executor pack {}", envelope.context.pack_id, self.pack.id),
            ));
        }
        if !self.pack.verify_tool_allowed(&envelope.tool_name) {
            return Err(ReachError::new(
                ErrorCode::ToolDenied,
                format!("tool {} not declared by pack {}", envelope.tool_name, self.pack.id),
            ));
        }
        if let Some(missing) = envelope
            .permissions_requested
            .iter()
            .find(|p| !self.pack.verify_permission_allowed(p))
        {
            return Err(ReachError::new(
                ErrorCode::PermissionDenied,
                format!("permission {missing} not declared by pack {}", self.pack.id),
            ));
        }
        if envelope.context.is_replay {
            if envelope.context.pack_integrity_hash != self.pack.signature_hash {
                return Err(ReachError::new(ErrorCode::ReplaySnapshotMismatch, "replay pack hash mismatch"));
            }
            if let Some(local_snapshot) = &self.snapshot_hash {
                if &envelope.context.registry_snapshot_hash != local_snapshot {
                    return Err(ReachError::new(ErrorCode::ReplaySnapshotMismatch, "replay registry snapshot mismatch"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_core::{CorrelationId, ExecutionContext, NodeId};
    use std::collections::BTreeMap;

    struct EchoDelegate;

    #[async_trait]
    impl DelegateExecutor for EchoDelegate {
        async fn execute(&self, envelope: &ExecutionEnvelope) -> Result<serde_json::Value, ReachError> {
            Ok(serde_json::json!({"tool": envelope.tool_name}))
        }
    }

    fn pack() -> ExecutionPack {
        let mut p = ExecutionPack {
            id: "pack-1".into(),
            version: "1.0.0".into(),
            spec_version: SPEC_VERSION.into(),
            declared_tools: vec!["Bash".into()],
            declared_permissions: vec!["fs:read".into()],
            model_requirements: BTreeMap::new(),
            execution_graph: serde_json::json!({}),
            deterministic_required: false,
            signature_hash: String::new(),
        };
        p.sign().unwrap();
        p
    }

    fn envelope(pack: &ExecutionPack) -> ExecutionEnvelope {
        ExecutionEnvelope {
            envelope_id: CorrelationId::new(),
            task_id: "task-1".into(),
            tool_name: "Bash".into(),
            arguments: serde_json::json!({}),
            permissions_requested: vec!["fs:read".into()],
            context: ExecutionContext {
                session_id: "s".into(),
                tenant_id: "t".into(),
                agent_id: "a".into(),
                pack_id: pack.id.clone(),
                pack_version: pack.version.clone(),
                pack_integrity_hash: pack.signature_hash.clone(),
                run_id: "r".into(),
                global_run_id: "r".into(),
                origin_node_id: NodeId::from_string("node-a"),
                executing_node_id: NodeId::from_string("node-b"),
                registry_snapshot_hash: "snap".into(),
                policy_version: "v1".into(),
                spec_version: SPEC_VERSION.into(),
                is_replay: false,
                deterministic: true,
                estimated_cost: None,
            },
        }
    }

    #[tokio::test]
    async fn valid_call_delegates() {
        let pack = pack();
        let env = envelope(&pack);
        let exec = PackExecutor::new(EchoDelegate, pack, Some("snap".into()));
        let result = exec.execute(env).await;
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn undeclared_tool_rejected_without_delegating() {
        let pack = pack();
        let mut env = envelope(&pack);
        env.tool_name = "Edit".into();
        let exec = PackExecutor::new(EchoDelegate, pack, None);
        let result = exec.execute(env).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::ToolDenied);
    }

    #[tokio::test]
    async fn replay_snapshot_mismatch_rejected() {
        let pack = pack();
        let mut env = envelope(&pack);
        env.context.is_replay = true;
        env.context.registry_snapshot_hash = "stale".into();
        let exec = PackExecutor::new(EchoDelegate, pack, Some("fresh".into()));
        let result = exec.execute(env).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::ReplaySnapshotMismatch);
    }

    #[tokio::test]
    async fn pack_id_mismatch_rejected() {
        let pack = pack();
        let mut env = envelope(&pack);
        env.context.pack_id = "other-pack".into();
        let exec = PackExecutor::new(EchoDelegate, pack, None);
        let result = exec.execute(env).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::PackMismatch);
    }
}
