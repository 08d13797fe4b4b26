// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-pack
//!
//! Execution packs: immutable signed bundles of metadata, tool/permission
//! allowlists, and a spec-version contract. Integrity is re-validated on
//! load, on delegation accept, and on every pack-executor call.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use reach_core::is_spec_version_supported;
use reach_error::{ErrorCode, ReachError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Permissions a marketplace-compliant pack may never declare.
const FORBIDDEN_MARKETPLACE_PERMISSIONS: &[&str] = &["sys:admin", "sys:exec"];

/// An execution pack: identifier, version, tool/permission allowlists, and
/// a content signature hash over everything but the signature itself.
///
/// Immutable once `signature_hash` is populated. Callers that need to
/// modify a pack must construct a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPack {
    /// Unique pack identifier.
    pub id: String,
    /// Semver pack version.
    pub version: String,
    /// Spec-version tag this pack was authored against.
    pub spec_version: String,
    /// Tool names this pack is allowed to invoke.
    pub declared_tools: Vec<String>,
    /// Permission ids this pack requires.
    pub declared_permissions: Vec<String>,
    /// Model family/id to minimum-requirement mapping.
    pub model_requirements: BTreeMap<String, String>,
    /// Opaque execution-graph blueprint (interpreted by the executor/planner).
    pub execution_graph: serde_json::Value,
    /// When set, every execution of this pack must be deterministic.
    pub deterministic_required: bool,
    /// `canonical_hash` of this pack with `signature_hash` cleared. Empty
    /// string means unsigned.
    #[serde(default)]
    pub signature_hash: String,
}

impl ExecutionPack {
    /// Computes the canonical content hash, excluding `signature_hash`.
    ///
    /// # Errors
    /// Returns an error if the pack fails to serialize, which should not
    /// happen for well-formed values.
    pub fn compute_hash(&self) -> Result<String, ReachError> {
        let mut unsigned = self.clone();
        unsigned.signature_hash = String::new();
        reach_hash::hash(&unsigned).map_err(|e| {
            ReachError::new(ErrorCode::Internal, "failed to canonicalize pack for hashing").with_source(e)
        })
    }

    /// Full integrity check: re-verifies the signature hash, spec-version
    /// compatibility, and presence of a signature at all.
    ///
    /// # Errors
    /// - [`ErrorCode::SignatureMissing`] if `signature_hash` is empty and
    ///   `allow_unsigned` is `false`.
    /// - [`ErrorCode::SpecVersionIncompatible`] if `spec_version` is outside
    ///   the runtime's supported set.
    /// - [`ErrorCode::SignatureInvalid`] if the recomputed hash doesn't
    ///   match the stored one.
    pub fn validate_integrity(&self, allow_unsigned: bool) -> Result<(), ReachError> {
        if self.signature_hash.is_empty() {
            if allow_unsigned {
                return Ok(());
            }
            return Err(ReachError::new(
                ErrorCode::SignatureMissing,
                format!("pack {} has no signature and legacy-unsigned policy is not set", self.id),
            ));
        }
        if !is_spec_version_supported(&self.spec_version) {
            return Err(ReachError::new(
                ErrorCode::SpecVersionIncompatible,
                format!("pack {} declares unsupported spec version {}", self.id, self.spec_version),
            ));
        }
        let recomputed = self.compute_hash()?;
        if recomputed != self.signature_hash {
            return Err(ReachError::new(
                ErrorCode::SignatureInvalid,
                format!("pack {} signature hash mismatch", self.id),
            ));
        }
        Ok(())
    }

    /// `true` if `tool` is present in `declared_tools`.
    #[must_use]
    pub fn verify_tool_allowed(&self, tool: &str) -> bool {
        self.declared_tools.iter().any(|t| t == tool)
    }

    /// `true` if `permission` is present in `declared_permissions`.
    #[must_use]
    pub fn verify_permission_allowed(&self, permission: &str) -> bool {
        self.declared_permissions.iter().any(|p| p == permission)
    }

    /// Marketplace-listing compliance: on top of integrity, rejects packs
    /// with an empty tool list or that declare `sys:admin`/`sys:exec`.
    ///
    /// # Errors
    /// [`ErrorCode::InvalidArgument`] describing the first violation found.
    pub fn validate_marketplace_compliance(&self) -> Result<(), ReachError> {
        if self.declared_tools.is_empty() {
            return Err(ReachError::new(
                ErrorCode::InvalidArgument,
                format!("pack {} declares no tools", self.id),
            ));
        }
        if let Some(forbidden) = self
            .declared_permissions
            .iter()
            .find(|p| FORBIDDEN_MARKETPLACE_PERMISSIONS.contains(&p.as_str()))
        {
            return Err(ReachError::new(
                ErrorCode::InvalidArgument,
                format!("pack {} declares forbidden marketplace permission {forbidden}", self.id),
            ));
        }
        Ok(())
    }

    /// Sign this pack in place by setting `signature_hash` to its computed
    /// content hash.
    ///
    /// # Errors
    /// Propagates [`Self::compute_hash`] failures.
    pub fn sign(&mut self) -> Result<(), ReachError> {
        self.signature_hash = self.compute_hash()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pack() -> ExecutionPack {
        let mut pack = ExecutionPack {
            id: "demo-pack".into(),
            version: "1.0.0".into(),
            spec_version: reach_core::SPEC_VERSION.into(),
            declared_tools: vec!["Bash".into()],
            declared_permissions: vec!["fs:read".into()],
            model_requirements: BTreeMap::new(),
            execution_graph: serde_json::json!({"steps": []}),
            deterministic_required: false,
            signature_hash: String::new(),
        };
        pack.sign().unwrap();
        pack
    }

    #[test]
    fn signed_pack_validates() {
        let pack = sample_pack();
        pack.validate_integrity(false).unwrap();
    }

    #[test]
    fn tampered_pack_fails_signature_check() {
        let mut pack = sample_pack();
        pack.declared_tools.push("Edit".into());
        let err = pack.validate_integrity(false).unwrap_err();
        assert_eq!(err.code, ErrorCode::SignatureInvalid);
    }

    #[test]
    fn unsigned_pack_rejected_unless_legacy_allowed() {
        let pack = ExecutionPack {
            id: "unsigned".into(),
            version: "1.0.0".into(),
            spec_version: reach_core::SPEC_VERSION.into(),
            declared_tools: vec!["Bash".into()],
            declared_permissions: vec![],
            model_requirements: BTreeMap::new(),
            execution_graph: serde_json::json!({}),
            deterministic_required: false,
            signature_hash: String::new(),
        };
        assert_eq!(pack.validate_integrity(false).unwrap_err().code, ErrorCode::SignatureMissing);
        pack.validate_integrity(true).unwrap();
    }

    #[test]
    fn incompatible_spec_version_rejected() {
        let mut pack = sample_pack();
        pack.spec_version = "reach/v99".into();
        pack.sign().unwrap();
        assert_eq!(pack.validate_integrity(false).unwrap_err().code, ErrorCode::SpecVersionIncompatible);
    }

    #[test]
    fn marketplace_rejects_empty_tools_and_admin_permission() {
        let mut pack = sample_pack();
        pack.declared_tools.clear();
        assert_eq!(pack.validate_marketplace_compliance().unwrap_err().code, ErrorCode::InvalidArgument);

        let mut pack2 = sample_pack();
        pack2.declared_permissions.push("sys:admin".into());
        assert_eq!(pack2.validate_marketplace_compliance().unwrap_err().code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn tool_and_permission_allowlist_checks() {
        let pack = sample_pack();
        assert!(pack.verify_tool_allowed("Bash"));
        assert!(!pack.verify_tool_allowed("Edit"));
        assert!(pack.verify_permission_allowed("fs:read"));
        assert!(!pack.verify_permission_allowed("fs:write"));
    }
}
