// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-config
//!
//! Configuration loading, validation, and merging for a Reach node.
//!
//! This crate provides [`ReachConfig`] — the top-level runtime settings —
//! together with helpers for loading from `mesh_config.json`, merging
//! overlays, applying the environment variables listed in spec.md §6, and
//! producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid JSON.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// The config could not be written back to disk.
    #[error("failed to write config: {reason}")]
    WriteError {
        /// Human-readable I/O error detail.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated field was used in the configuration.
    DeprecatedField {
        /// Name of the deprecated field.
        field: String,
        /// Suggested replacement, if any.
        suggestion: Option<String>,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A timeout is unusually large.
    LargeTimeout {
        /// Which setting the timeout belongs to.
        setting: String,
        /// Timeout value in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => {
                write!(f, "deprecated field '{field}'")?;
                if let Some(s) = suggestion {
                    write!(f, " — use '{s}' instead")?;
                }
                Ok(())
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeTimeout { setting, secs } => {
                write!(f, "setting '{setting}' has a large timeout ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for a Reach node, the on-disk shape of
/// `mesh_config.json`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ReachConfig {
    /// This node's id, once derived. `None` before first key generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Named on/off switches for optional behavior.
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
    /// Network-facing settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Security-facing settings.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Offline sync settings.
    #[serde(default)]
    pub sync: SyncConfigBlock,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            feature_flags: BTreeMap::new(),
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            sync: SyncConfigBlock::default(),
        }
    }
}

/// Listener and timeout settings for the mesh fabric.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Address the framed-message listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Fallback HTTP listener port (`/mesh/health`, `/mesh/push`, `/mesh/poll`).
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Idle-connection timeout in seconds; connections are reaped at 2x this.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Deployment region, mirrors `REACH_REGION`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Deployment zone, mirrors `REACH_ZONE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Deployment cluster, mirrors `REACH_CLUSTER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Cloud provider label, mirrors `REACH_CLOUD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
    /// Free-form node labels, mirrors `REACH_NODE_LABELS` (`k=v,k=v`).
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:7340".into()
}

fn default_http_port() -> u16 {
    7341
}

fn default_connection_timeout_secs() -> u64 {
    60
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            connection_timeout_secs: default_connection_timeout_secs(),
            region: None,
            zone: None,
            cluster: None,
            cloud: None,
            node_labels: BTreeMap::new(),
        }
    }
}

/// Policy enforcement mode.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Policy violations are logged but not blocked.
    Warn,
    /// Policy violations are blocked.
    Enforce,
}

impl Default for PolicyMode {
    fn default() -> Self {
        Self::Enforce
    }
}

/// Signing-secret and policy settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecurityConfig {
    /// `warn` or `enforce`, mirrors `REACH_POLICY_MODE`.
    #[serde(default)]
    pub policy_mode: PolicyMode,
    /// Whether unsigned legacy packs are accepted, mirrors
    /// `REACH_ALLOW_LEGACY_UNSIGNED_PACKS`.
    #[serde(default)]
    pub allow_legacy_unsigned_packs: bool,
    /// Directory holding `mesh_key.pem` and `.reach/keys/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys_dir: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { policy_mode: PolicyMode::default(), allow_legacy_unsigned_packs: false, keys_dir: None }
    }
}

/// Offline-sync tuning, mirroring [reach-sync]'s `SyncConfig` shape without
/// depending on that crate.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SyncConfigBlock {
    /// Maximum events per exchanged bundle.
    #[serde(default = "default_bundle_max_events")]
    pub bundle_max_events: usize,
    /// Conflict resolution policy: `append_only`, `lww`, or `vector_clock`.
    #[serde(default = "default_conflict_policy")]
    pub conflict_policy: String,
}

fn default_bundle_max_events() -> usize {
    500
}

fn default_conflict_policy() -> String {
    "vector_clock".into()
}

impl Default for SyncConfigBlock {
    fn default() -> Self {
        Self { bundle_max_events: default_bundle_max_events(), conflict_policy: default_conflict_policy() }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a connection timeout generates a warning.
const LARGE_TIMEOUT_THRESHOLD_SECS: u64 = 3_600;

/// Recognised conflict policy names.
const VALID_CONFLICT_POLICIES: &[&str] = &["append_only", "lww", "vector_clock"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ReachConfig`] from an optional `mesh_config.json` path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`ReachConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
///
/// # Errors
/// [`ConfigError::FileNotFound`] if `path` is given but missing;
/// [`ConfigError::ParseError`] if its contents aren't valid JSON for this shape.
pub fn load_config(path: Option<&Path>) -> Result<ReachConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content =
                std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound { path: p.display().to_string() })?;
            parse_json(&content)?
        }
        None => ReachConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a JSON string into a [`ReachConfig`].
///
/// # Errors
/// [`ConfigError::ParseError`] if the content isn't valid JSON for this shape.
pub fn parse_json(content: &str) -> Result<ReachConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ReachConfig::default());
    }
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

/// Persist `config` to `path` as pretty-printed JSON.
///
/// # Errors
/// [`ConfigError::WriteError`] on any I/O or serialization failure.
pub fn save_config(config: &ReachConfig, path: &Path) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::WriteError { reason: e.to_string() })?;
    std::fs::write(path, json).map_err(|e| ConfigError::WriteError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply every environment variable recognized per spec.md §6:
/// `REACH_LOG_LEVEL` (consumed by `reach-telemetry`, not stored here),
/// `REACH_POLICY_MODE`, `REACH_ALLOW_LEGACY_UNSIGNED_PACKS`, `REACH_REGION`,
/// `REACH_ZONE`, `REACH_CLUSTER`, `REACH_NODE_LABELS` (`k=v,k=v`), `REACH_CLOUD`.
pub fn apply_env_overrides(config: &mut ReachConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] but sourcing values through `lookup`
/// instead of the process environment, so the merge logic is testable
/// without mutating global state.
fn apply_overrides_from(config: &mut ReachConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("REACH_POLICY_MODE") {
        match val.as_str() {
            "warn" => config.security.policy_mode = PolicyMode::Warn,
            "enforce" => config.security.policy_mode = PolicyMode::Enforce,
            _ => {}
        }
    }
    if let Some(val) = lookup("REACH_ALLOW_LEGACY_UNSIGNED_PACKS") {
        config.security.allow_legacy_unsigned_packs = matches!(val.as_str(), "1" | "true" | "yes");
    }
    if let Some(val) = lookup("REACH_REGION") {
        config.network.region = Some(val);
    }
    if let Some(val) = lookup("REACH_ZONE") {
        config.network.zone = Some(val);
    }
    if let Some(val) = lookup("REACH_CLUSTER") {
        config.network.cluster = Some(val);
    }
    if let Some(val) = lookup("REACH_CLOUD") {
        config.network.cloud = Some(val);
    }
    if let Some(val) = lookup("REACH_NODE_LABELS") {
        config.network.node_labels = parse_node_labels(&val);
    }
}

fn parse_node_labels(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            let v = v.trim();
            if k.is_empty() {
                None
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (empty bind address, unrecognized conflict policy) are
/// returned as a [`ConfigError::ValidationError`]; soft issues come back as
/// warnings.
///
/// # Errors
/// [`ConfigError::ValidationError`] if any hard validation rule fails.
pub fn validate_config(config: &ReachConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.network.bind_address.trim().is_empty() {
        errors.push("network.bind_address must not be empty".into());
    }
    if !VALID_CONFLICT_POLICIES.contains(&config.sync.conflict_policy.as_str()) {
        errors.push(format!("invalid sync.conflict_policy '{}'", config.sync.conflict_policy));
    }
    if config.sync.bundle_max_events == 0 {
        errors.push("sync.bundle_max_events must be greater than zero".into());
    }

    if config.network.connection_timeout_secs > LARGE_TIMEOUT_THRESHOLD_SECS {
        warnings.push(ConfigWarning::LargeTimeout {
            setting: "network.connection_timeout_secs".into(),
            secs: config.network.connection_timeout_secs,
        });
    }
    if config.node_id.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "node_id".into(),
            hint: "node id has not been derived yet; it will be generated on first start".into(),
        });
    }
    if config.security.keys_dir.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "security.keys_dir".into(),
            hint: "key material will be stored relative to the working directory".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over `base`.
///
/// Feature-flag and node-label maps are combined; on key collisions the
/// overlay entry wins.
#[must_use]
pub fn merge_configs(base: ReachConfig, overlay: ReachConfig) -> ReachConfig {
    let mut feature_flags = base.feature_flags;
    feature_flags.extend(overlay.feature_flags);

    let mut node_labels = base.network.node_labels;
    node_labels.extend(overlay.network.node_labels);

    ReachConfig {
        node_id: overlay.node_id.or(base.node_id),
        feature_flags,
        network: NetworkConfig {
            bind_address: if overlay.network.bind_address == default_bind_address() && base.network.bind_address != default_bind_address() {
                base.network.bind_address
            } else {
                overlay.network.bind_address
            },
            http_port: overlay.network.http_port,
            connection_timeout_secs: overlay.network.connection_timeout_secs,
            region: overlay.network.region.or(base.network.region),
            zone: overlay.network.zone.or(base.network.zone),
            cluster: overlay.network.cluster.or(base.network.cluster),
            cloud: overlay.network.cloud.or(base.network.cloud),
            node_labels,
        },
        security: SecurityConfig {
            policy_mode: overlay.security.policy_mode,
            allow_legacy_unsigned_packs: overlay.security.allow_legacy_unsigned_packs || base.security.allow_legacy_unsigned_packs,
            keys_dir: overlay.security.keys_dir.or(base.security.keys_dir),
        },
        sync: overlay.sync,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ReachConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(!warnings.is_empty());
    }

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = ReachConfig::default();
        assert_eq!(cfg.security.policy_mode, PolicyMode::Enforce);
        assert_eq!(cfg.sync.bundle_max_events, 500);
    }

    #[test]
    fn parse_valid_json_string() {
        let json = r#"{"security": {"policy_mode": "warn"}}"#;
        let cfg = parse_json(json).unwrap();
        assert_eq!(cfg.security.policy_mode, PolicyMode::Warn);
    }

    #[test]
    fn parse_invalid_json_gives_parse_error() {
        let err = parse_json("{not valid json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn empty_string_parses_to_defaults() {
        let cfg = parse_json("").unwrap();
        assert_eq!(cfg, ReachConfig::default());
    }

    #[test]
    fn validation_catches_invalid_conflict_policy() {
        let mut cfg = ReachConfig::default();
        cfg.sync.conflict_policy = "nonsense".into();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_empty_bind_address() {
        let mut cfg = ReachConfig::default();
        cfg.network.bind_address = "  ".into();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn large_timeout_produces_warning() {
        let mut cfg = ReachConfig::default();
        cfg.network.connection_timeout_secs = 7_200;
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LargeTimeout { .. })));
    }

    #[test]
    fn merge_overlay_overrides_base() {
        let base = ReachConfig { node_id: Some("node-a".into()), ..Default::default() };
        let overlay = ReachConfig { node_id: Some("node-b".into()), ..Default::default() };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.node_id.as_deref(), Some("node-b"));
    }

    #[test]
    fn merge_combines_feature_flags_and_labels() {
        let mut base = ReachConfig::default();
        base.feature_flags.insert("a".into(), true);
        base.network.node_labels.insert("env".into(), "prod".into());

        let mut overlay = ReachConfig::default();
        overlay.feature_flags.insert("b".into(), false);
        overlay.network.node_labels.insert("tier".into(), "gold".into());

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.feature_flags.get("a"), Some(&true));
        assert_eq!(merged.feature_flags.get("b"), Some(&false));
        assert_eq!(merged.network.node_labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(merged.network.node_labels.get("tier").map(String::as_str), Some("gold"));
    }

    #[test]
    fn env_overrides_apply_policy_mode_and_labels() {
        let vars: BTreeMap<&str, &str> =
            BTreeMap::from([("REACH_POLICY_MODE", "warn"), ("REACH_NODE_LABELS", "env=prod, tier=gold")]);
        let mut cfg = ReachConfig::default();
        apply_overrides_from(&mut cfg, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.security.policy_mode, PolicyMode::Warn);
        assert_eq!(cfg.network.node_labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(cfg.network.node_labels.get("tier").map(String::as_str), Some("gold"));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh_config.json");
        std::fs::write(&path, r#"{"node_id": "node-a"}"#).unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.node_id.as_deref(), Some("node-a"));
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/mesh_config.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg, ReachConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh_config.json");
        let mut cfg = ReachConfig::default();
        cfg.node_id = Some("node-a".into());
        save_config(&cfg, &path).unwrap();
        let reloaded = load_config(Some(&path)).unwrap();
        assert_eq!(reloaded.node_id.as_deref(), Some("node-a"));
    }
}
