// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-policy
//!
//! A pure decision function over `(policy, pack, node, request)`. Produces
//! deny reasons in a fixed evaluation order and never persists anything —
//! callers decide what to do with a [`PolicyDecision`] based on
//! [`PolicyMode`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

use reach_pack::ExecutionPack;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ordered deny reason codes. [`PolicyDecision::reasons`] preserves this
/// evaluation order, not just presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Pack integrity/signature check failed.
    InvalidSignature,
    /// Requested tool is not in the pack's declared tool list.
    UndeclaredTool,
    /// Requested permission exceeds what the policy allows.
    PermissionScopeExceedsPolicy,
    /// Pack requires a model the policy does not allow.
    ModelRequirementNotAllowed,
    /// Policy requires determinism and the pack does not guarantee it.
    DeterminismRequired,
}

/// Whether policy violations block the request or are merely logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Violations are recorded as an audit event; the request still proceeds.
    Warn,
    /// Violations cause a 403-equivalent rejection.
    Enforce,
}

/// Policy configuration a node enforces for incoming pack executions.
///
/// An empty `allowed_permissions` or `allowed_models` means "no
/// restriction" — only a non-empty allowlist narrows what's permitted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Enforcement mode.
    pub mode: PolicyMode,
    /// Permission ids this policy allows. Empty means unrestricted.
    pub allowed_permissions: Vec<String>,
    /// Model ids/families this policy allows. Empty means unrestricted.
    pub allowed_models: Vec<String>,
    /// Whether packs flagged legacy-unsigned by their submitter may be
    /// accepted without a signature.
    pub allow_legacy_unsigned: bool,
    /// Whether this policy requires every accepted pack to guarantee
    /// deterministic execution.
    pub require_determinism: bool,
}

/// One execution request evaluated against a [`Policy`].
#[derive(Debug, Clone)]
pub struct PolicyRequest<'a> {
    /// Pack being invoked.
    pub pack: &'a ExecutionPack,
    /// Tool name the caller wants to invoke.
    pub requested_tool: &'a str,
    /// Permission ids the caller is requesting.
    pub requested_permissions: &'a [String],
    /// Whether the submitter flagged this pack as legacy-unsigned.
    pub submitter_flagged_legacy_unsigned: bool,
}

/// Result of evaluating a [`PolicyRequest`] against a [`Policy`].
///
/// Invariant: `allowed == reasons.is_empty()`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyDecision {
    /// `true` iff `reasons` is empty.
    pub allowed: bool,
    /// Deny reasons, in evaluation order. Empty when allowed.
    pub reasons: Vec<DenyReason>,
}

/// What a caller should do with a [`PolicyDecision`], given the policy's
/// [`PolicyMode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateAction {
    /// No violations; proceed silently.
    Allow,
    /// Violations found under [`PolicyMode::Warn`]; proceed and emit an
    /// audit event.
    AllowWithAudit(PolicyDecision),
    /// Violations found under [`PolicyMode::Enforce`]; reject.
    Deny(PolicyDecision),
}

/// Evaluate `request` against `policy`, returning a pure decision.
#[must_use]
pub fn decide(policy: &Policy, request: &PolicyRequest<'_>) -> PolicyDecision {
    let mut reasons = Vec::new();

    let allow_unsigned = request.submitter_flagged_legacy_unsigned && policy.allow_legacy_unsigned;
    if request.pack.validate_integrity(allow_unsigned).is_err() {
        reasons.push(DenyReason::InvalidSignature);
    }

    if !request.pack.verify_tool_allowed(request.requested_tool) {
        reasons.push(DenyReason::UndeclaredTool);
    }

    if !policy.allowed_permissions.is_empty()
        && request
            .requested_permissions
            .iter()
            .any(|p| !policy.allowed_permissions.contains(p))
    {
        reasons.push(DenyReason::PermissionScopeExceedsPolicy);
    }

    if !policy.allowed_models.is_empty()
        && request
            .pack
            .model_requirements
            .keys()
            .any(|m| !policy.allowed_models.contains(m))
    {
        reasons.push(DenyReason::ModelRequirementNotAllowed);
    }

    if policy.require_determinism && !request.pack.deterministic_required {
        reasons.push(DenyReason::DeterminismRequired);
    }

    PolicyDecision {
        allowed: reasons.is_empty(),
        reasons,
    }
}

/// Evaluate `request` against `policy` and fold the result with
/// [`PolicyMode`] into the action a caller should take.
#[must_use]
pub fn gate(policy: &Policy, request: &PolicyRequest<'_>) -> GateAction {
    let decision = decide(policy, request);
    if decision.allowed {
        return GateAction::Allow;
    }
    match policy.mode {
        PolicyMode::Warn => GateAction::AllowWithAudit(decision),
        PolicyMode::Enforce => GateAction::Deny(decision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn signed_pack(tools: &[&str], permissions: &[&str], deterministic: bool) -> ExecutionPack {
        let mut pack = ExecutionPack {
            id: "pack-1".into(),
            version: "1.0.0".into(),
            spec_version: reach_core::SPEC_VERSION.into(),
            declared_tools: tools.iter().map(|t| t.to_string()).collect(),
            declared_permissions: permissions.iter().map(|p| p.to_string()).collect(),
            model_requirements: BTreeMap::new(),
            execution_graph: serde_json::json!({}),
            deterministic_required: deterministic,
            signature_hash: String::new(),
        };
        pack.sign().unwrap();
        pack
    }

    fn permissive_policy() -> Policy {
        Policy {
            mode: PolicyMode::Enforce,
            allowed_permissions: vec![],
            allowed_models: vec![],
            allow_legacy_unsigned: false,
            require_determinism: false,
        }
    }

    #[test]
    fn clean_request_is_allowed() {
        let pack = signed_pack(&["Bash"], &["fs:read"], false);
        let policy = permissive_policy();
        let req = PolicyRequest {
            pack: &pack,
            requested_tool: "Bash",
            requested_permissions: &["fs:read".to_string()],
            submitter_flagged_legacy_unsigned: false,
        };
        let decision = decide(&policy, &req);
        assert!(decision.allowed);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn reasons_are_ordered() {
        let mut pack = signed_pack(&["Bash"], &["fs:read"], false);
        pack.declared_tools.clear(); // breaks signature AND undeclared_tool
        let mut policy = permissive_policy();
        policy.allowed_permissions = vec!["fs:write".into()];
        policy.require_determinism = true;
        let req = PolicyRequest {
            pack: &pack,
            requested_tool: "Bash",
            requested_permissions: &["fs:read".to_string()],
            submitter_flagged_legacy_unsigned: false,
        };
        let decision = decide(&policy, &req);
        assert_eq!(
            decision.reasons,
            vec![
                DenyReason::InvalidSignature,
                DenyReason::UndeclaredTool,
                DenyReason::PermissionScopeExceedsPolicy,
                DenyReason::DeterminismRequired,
            ]
        );
    }

    #[test]
    fn warn_mode_allows_with_audit() {
        let pack = signed_pack(&["Bash"], &[], false);
        let mut policy = permissive_policy();
        policy.mode = PolicyMode::Warn;
        policy.require_determinism = true;
        let req = PolicyRequest {
            pack: &pack,
            requested_tool: "Bash",
            requested_permissions: &[],
            submitter_flagged_legacy_unsigned: false,
        };
        match gate(&policy, &req) {
            GateAction::AllowWithAudit(decision) => assert_eq!(decision.reasons, vec![DenyReason::DeterminismRequired]),
            other => panic!("expected AllowWithAudit, got {other:?}"),
        }
    }

    #[test]
    fn legacy_unsigned_requires_both_flags() {
        let pack = ExecutionPack {
            id: "legacy".into(),
            version: "1.0.0".into(),
            spec_version: reach_core::SPEC_VERSION.into(),
            declared_tools: vec!["Bash".into()],
            declared_permissions: vec![],
            model_requirements: BTreeMap::new(),
            execution_graph: serde_json::json!({}),
            deterministic_required: false,
            signature_hash: String::new(),
        };
        // deliberately never signed
        let mut policy = permissive_policy();

        let req_policy_disallows = PolicyRequest {
            pack: &pack,
            requested_tool: "Bash",
            requested_permissions: &[],
            submitter_flagged_legacy_unsigned: true,
        };
        assert!(!decide(&policy, &req_policy_disallows).allowed);

        policy.allow_legacy_unsigned = true;
        assert!(decide(&policy, &req_policy_disallows).allowed);

        let req_not_flagged = PolicyRequest {
            pack: &pack,
            requested_tool: "Bash",
            requested_permissions: &[],
            submitter_flagged_legacy_unsigned: false,
        };
        assert!(!decide(&policy, &req_not_flagged).allowed);
    }
}
