// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-registry
//!
//! The capability registry maps tool ids to registered [`Capability`]
//! entries and decides whether an execution pack is compatible with this
//! node's major-version window. Compatibility results are cached per
//! `id@version` and invalidated on every mutation.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use reach_core::Capability;
use reach_error::{ErrorCode, ReachError};
use reach_pack::ExecutionPack;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// In-memory capability registry with a compatibility-decision cache.
///
/// Thread-safe: all state lives behind an [`RwLock`], matching the
/// read-heavy/write-rare access pattern (register happens at startup or on
/// rare admin action, `get`/`list`/`validate_*` happen on every delegation).
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    capabilities: HashMap<String, Capability>,
    compatibility_cache: HashMap<String, bool>,
}

impl CapabilityRegistry {
    /// An empty registry with no major-version window set (accepts any
    /// major version).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any prior entry with the same id.
    /// Clears the compatibility cache.
    pub fn register(&self, cap: Capability) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.capabilities.insert(cap.id.clone(), cap);
        inner.compatibility_cache.clear();
    }

    /// Look up a capability by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Capability> {
        self.inner.read().expect("registry lock poisoned").capabilities.get(id).cloned()
    }

    /// All registered capabilities, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<Capability> {
        self.inner.read().expect("registry lock poisoned").capabilities.values().cloned().collect()
    }

    /// `true` if every tool in `tools` is covered: either mapped to some
    /// registered capability's `required_tools`, or the tool id is itself a
    /// registered capability id.
    #[must_use]
    pub fn validate_tools(&self, tools: &[String]) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        let covered: HashSet<&str> = inner
            .capabilities
            .values()
            .flat_map(|c| c.required_tools.iter().map(String::as_str))
            .chain(inner.capabilities.keys().map(String::as_str))
            .collect();
        tools.iter().all(|t| covered.contains(t.as_str()))
    }

    /// Validates an execution pack against `supported_pack_major`: the
    /// pack's major version must not exceed it, and every declared tool
    /// must be covered per [`Self::validate_tools`]. The boolean result is
    /// cached keyed by `id@version` until the next [`Self::register`].
    ///
    /// # Errors
    /// [`ErrorCode::PackMismatch`] describing why the pack was rejected.
    pub fn validate_pack_compatibility(
        &self,
        pack: &ExecutionPack,
        supported_pack_major: u64,
    ) -> Result<(), ReachError> {
        let cache_key = format!("{}@{}", pack.id, pack.version);
        if let Some(cached) = self.inner.read().expect("registry lock poisoned").compatibility_cache.get(&cache_key) {
            return if *cached {
                Ok(())
            } else {
                Err(ReachError::new(
                    ErrorCode::PackMismatch,
                    format!("pack {cache_key} is incompatible with this node (cached)"),
                ))
            };
        }

        let result = self.check_compatibility(pack, supported_pack_major);
        self.inner
            .write()
            .expect("registry lock poisoned")
            .compatibility_cache
            .insert(cache_key, result.is_ok());
        result
    }

    fn check_compatibility(&self, pack: &ExecutionPack, supported_pack_major: u64) -> Result<(), ReachError> {
        let pack_major = major_version(&pack.version).ok_or_else(|| {
            ReachError::new(ErrorCode::PackMismatch, format!("pack {} has an unparseable version {}", pack.id, pack.version))
        })?;
        if pack_major > supported_pack_major {
            return Err(ReachError::new(
                ErrorCode::PackMismatch,
                format!(
                    "pack {} major version {pack_major} exceeds supported window {supported_pack_major}",
                    pack.id
                ),
            ));
        }
        if !self.validate_tools(&pack.declared_tools) {
            return Err(ReachError::new(
                ErrorCode::CapabilityUnmapped,
                format!("pack {} declares tools not covered by any registered capability", pack.id),
            ));
        }
        Ok(())
    }
}

/// Parses the leading `major` component out of a semver-like string
/// (`"2.3.1"` -> `2`).
fn major_version(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(id: &str, tools: &[&str]) -> Capability {
        Capability {
            id: id.into(),
            version: "1.0.0".into(),
            required_tools: tools.iter().map(|t| t.to_string()).collect(),
            required_permissions: vec![],
            required_models: vec![],
            deterministic: false,
            stateful: false,
            io_schema: None,
        }
    }

    fn pack(id: &str, version: &str, tools: &[&str]) -> ExecutionPack {
        let mut p = ExecutionPack {
            id: id.into(),
            version: version.into(),
            spec_version: reach_core::SPEC_VERSION.into(),
            declared_tools: tools.iter().map(|t| t.to_string()).collect(),
            declared_permissions: vec![],
            model_requirements: Default::default(),
            execution_graph: serde_json::json!({}),
            deterministic_required: false,
            signature_hash: String::new(),
        };
        p.sign().unwrap();
        p
    }

    #[test]
    fn register_clears_compatibility_cache() {
        let reg = CapabilityRegistry::new();
        let p = pack("p1", "1.0.0", &["Bash"]);
        assert!(reg.validate_pack_compatibility(&p, 1).is_err());
        reg.register(capability("tool.bash", &["Bash"]));
        // without the cache clear this would still read the cached error
        assert!(reg.validate_pack_compatibility(&p, 1).is_ok());
    }

    #[test]
    fn older_pack_runs_on_newer_node() {
        let reg = CapabilityRegistry::new();
        reg.register(capability("tool.bash", &["Bash"]));
        let p = pack("p1", "1.2.0", &["Bash"]);
        assert!(reg.validate_pack_compatibility(&p, 2).is_ok());
    }

    #[test]
    fn newer_pack_refused_by_older_node() {
        let reg = CapabilityRegistry::new();
        reg.register(capability("tool.bash", &["Bash"]));
        let p = pack("p1", "3.0.0", &["Bash"]);
        let err = reg.validate_pack_compatibility(&p, 2).unwrap_err();
        assert_eq!(err.code, ErrorCode::PackMismatch);
    }

    #[test]
    fn tool_id_itself_registered_counts_as_covered() {
        let reg = CapabilityRegistry::new();
        reg.register(capability("Bash", &[]));
        assert!(reg.validate_tools(&["Bash".to_string()]));
    }

    #[test]
    fn uncovered_tool_fails_validation() {
        let reg = CapabilityRegistry::new();
        reg.register(capability("tool.bash", &["Bash"]));
        assert!(!reg.validate_tools(&["Edit".to_string()]));
    }
}
