//! Capability registry entry types (spec.md §3 "Capability").

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered capability: the unit the [capability registry](https://docs.rs)
/// (`reach-registry`) maps tools onto and validates pack compatibility
/// against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Capability {
    /// Unique capability id (e.g. `"tool.bash"`).
    pub id: String,
    /// Semver version of this capability's contract.
    pub version: String,
    /// Tool ids this capability covers.
    pub required_tools: Vec<String>,
    /// Permission ids this capability requires from the caller.
    pub required_permissions: Vec<String>,
    /// Model ids/families this capability is compatible with. Empty means
    /// "any model".
    pub required_models: Vec<String>,
    /// Whether invoking this capability is guaranteed deterministic.
    pub deterministic: bool,
    /// Whether invoking this capability mutates host-side state.
    pub stateful: bool,
    /// Optional JSON Schema for input/output validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_schema: Option<serde_json::Value>,
}

/// How well a node's registry supports a given tool or capability id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum SupportLevel {
    /// Natively registered and executable.
    Native,
    /// Available via an adapter/emulation layer.
    Emulated {
        /// Human-readable description of the emulation strategy.
        strategy: String,
    },
    /// Not available at all.
    Unsupported,
}

/// A snapshot of which tool/capability ids a node's registry currently
/// supports, and at what level.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityManifest {
    entries: BTreeMap<String, SupportLevel>,
}

impl CapabilityManifest {
    /// An empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record support level for a tool/capability id.
    pub fn insert(&mut self, id: impl Into<String>, level: SupportLevel) {
        self.entries.insert(id.into(), level);
    }

    /// Look up the support level for an id, if known.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SupportLevel> {
        self.entries.get(id)
    }

    /// Returns `true` if `id` is present in the manifest at any level.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

/// Set of tool/permission requirements a pack or request declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityRequirements {
    /// Tool ids required.
    pub tools: Vec<String>,
    /// Permission ids required.
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lookup_roundtrip() {
        let mut m = CapabilityManifest::new();
        m.insert("tool.bash", SupportLevel::Native);
        assert!(m.contains("tool.bash"));
        assert!(matches!(m.get("tool.bash"), Some(SupportLevel::Native)));
        assert!(!m.contains("tool.unknown"));
    }

    #[test]
    fn capability_serde_roundtrip() {
        let cap = Capability {
            id: "tool.bash".into(),
            version: "1.0.0".into(),
            required_tools: vec!["Bash".into()],
            required_permissions: vec!["exec".into()],
            required_models: vec![],
            deterministic: false,
            stateful: true,
            io_schema: None,
        };
        let json = serde_json::to_string(&cap).unwrap();
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(cap, back);
    }
}
