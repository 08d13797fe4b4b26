// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-telemetry
//!
//! Ambient observability for a Reach node: `tracing_subscriber`
//! initialization, per-pack metrics persisted to
//! `telemetry/packs/<pack-id>.json`, and a common [`AuditSink`] trait that
//! components across the mesh (handshake, delegator, autonomous loop, policy
//! in warn mode) write structured audit events to.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use reach_error::{ErrorCode, ReachError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

// ---------------------------------------------------------------------------
// Tracing init
// ---------------------------------------------------------------------------

/// Output format for the process-wide tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact text.
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// Initialize the process-wide `tracing` subscriber from `log_level`
/// (an `EnvFilter` directive string, e.g. `"reach=info"`), `log_dir`
/// (appends to `log_dir/reach.log` if given, else writes to stdout), and
/// `format`. Mirrors `REACH_LOG_LEVEL` / `REACH_LOG_DIR` from spec.md §6.
///
/// # Errors
/// [`ErrorCode::ConfigInvalid`] if `log_level` isn't a valid filter
/// directive, or `log_dir` can't be created/opened for appending.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>, format: LogFormat) -> Result<(), ReachError> {
    let filter = EnvFilter::try_new(log_level)
        .map_err(|e| ReachError::new(ErrorCode::ConfigInvalid, format!("invalid log level directive '{log_level}'")).with_source(e))?;

    let writer: Box<dyn Fn() -> Box<dyn std::io::Write> + Send + Sync> = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| ReachError::new(ErrorCode::ConfigInvalid, format!("failed to create log dir {}", dir.display())).with_source(e))?;
            let path = dir.join("reach.log");
            Box::new(move || {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .expect("failed to open log file for append");
                Box::new(file) as Box<dyn std::io::Write>
            })
        }
        None => Box::new(|| Box::new(std::io::stdout()) as Box<dyn std::io::Write>),
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pack metrics
// ---------------------------------------------------------------------------

/// Invocation counters for one pack, persisted at
/// `telemetry/packs/<pack-id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackMetrics {
    /// Pack id these metrics belong to.
    pub pack_id: String,
    /// Pack version at last observation.
    pub version: String,
    /// Total number of times the pack was invoked.
    pub invocation_count: u64,
    /// When the pack was last invoked.
    #[serde(default)]
    pub last_invoked_at: Option<DateTime<Utc>>,
    /// Total number of times invocation was denied (policy, registry, delegation).
    #[serde(default)]
    pub deny_count: u64,
    /// Reason for the most recent denial, if any.
    #[serde(default)]
    pub last_deny_reason: Option<String>,
}

impl PackMetrics {
    /// A fresh, zeroed counter set for `pack_id` at `version`.
    #[must_use]
    pub fn new(pack_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self { pack_id: pack_id.into(), version: version.into(), invocation_count: 0, last_invoked_at: None, deny_count: 0, last_deny_reason: None }
    }

    /// Record one successful invocation at `now`.
    pub fn record_invocation(&mut self, now: DateTime<Utc>) {
        self.invocation_count += 1;
        self.last_invoked_at = Some(now);
    }

    /// Record one denied invocation with `reason`.
    pub fn record_denial(&mut self, reason: impl Into<String>) {
        self.deny_count += 1;
        self.last_deny_reason = Some(reason.into());
    }
}

/// Loads and persists [`PackMetrics`] under `<root>/telemetry/packs/<pack-id>.json`,
/// one file per pack, written via temp-file + rename.
pub struct PackMetricsStore {
    root: PathBuf,
}

impl PackMetricsStore {
    /// A store rooted at `root` (typically the node's data directory).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, pack_id: &str) -> PathBuf {
        self.root.join("telemetry").join("packs").join(format!("{pack_id}.json"))
    }

    /// Load a pack's metrics, or a fresh zeroed set if no file exists yet.
    ///
    /// # Errors
    /// [`ErrorCode::StorageReadFailed`] if the file exists but can't be read
    /// or parsed.
    pub fn load(&self, pack_id: &str, version: &str) -> Result<PackMetrics, ReachError> {
        let path = self.path_for(pack_id);
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| ReachError::new(ErrorCode::StorageReadFailed, format!("failed to parse {}", path.display())).with_source(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PackMetrics::new(pack_id, version)),
            Err(e) => Err(ReachError::new(ErrorCode::StorageReadFailed, format!("failed to read {}", path.display())).with_source(e)),
        }
    }

    /// Persist `metrics` via temp-file + rename at mode 0644.
    ///
    /// # Errors
    /// [`ErrorCode::StorageWriteFailed`] on any I/O failure.
    pub fn save(&self, metrics: &PackMetrics) -> Result<(), ReachError> {
        let path = self.path_for(&metrics.pack_id);
        let dir = path.parent().expect("pack metrics path always has a parent");
        std::fs::create_dir_all(dir)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, format!("failed to create {}", dir.display())).with_source(e))?;

        let json = serde_json::to_string_pretty(metrics)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to serialize pack metrics").with_source(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to create temp file").with_source(e))?;
        use std::io::Write;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to write temp file").with_source(e))?;

        #[cfg(unix)]
        {
            let mut perms = tmp
                .as_file()
                .metadata()
                .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to stat temp file").with_source(e))?
                .permissions();
            perms.set_mode(0o644);
            tmp.as_file()
                .set_permissions(perms)
                .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to chmod temp file").with_source(e))?;
        }

        tmp.persist(&path).map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to persist pack metrics").with_source(e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audit sink
// ---------------------------------------------------------------------------

/// One structured audit record, common across every component that emits
/// audit events (handshake, delegator, autonomous loop, policy warn mode).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// Component that produced this event (e.g. `"handshake"`, `"delegator"`).
    pub component: String,
    /// Short machine-readable outcome code.
    pub code: String,
    /// Human-readable detail.
    pub reason: String,
    /// Node this event concerns, if applicable.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Correlation id tying this event to a run, if applicable.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

/// Receives structured audit events from any component.
pub trait AuditSink: Send + Sync {
    /// Record one audit event.
    fn record(&self, event: AuditEvent);
}

/// Emits every audit event as a structured `tracing` event at `info` level.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            component = %event.component,
            code = %event.code,
            reason = %event.reason,
            node_id = event.node_id.as_deref().unwrap_or(""),
            correlation_id = event.correlation_id.as_deref().unwrap_or(""),
            "audit_event"
        );
    }
}

/// Keeps every recorded audit event in memory, for querying or tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink lock poisoned").clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().expect("audit sink lock poisoned").push(event);
    }
}

/// Fans an audit event out to both a `tracing` event and an in-memory,
/// queryable log. The default pairing a node reaches for.
#[derive(Debug, Default)]
pub struct CompositeAuditSink {
    memory: InMemoryAuditSink,
    tracing_sink: TracingAuditSink,
}

impl CompositeAuditSink {
    /// A fresh composite sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.memory.events()
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) {
        self.tracing_sink.record(event.clone());
        self.memory.record(event);
    }
}

/// Swap-in-place holder for an [`AuditSink`] trait object, so a node can
/// reconfigure its audit destination after startup without re-threading it
/// through every component.
pub struct AuditSinkHandle {
    inner: RwLock<Box<dyn AuditSink>>,
}

impl AuditSinkHandle {
    /// A handle wrapping `sink`.
    pub fn new(sink: impl AuditSink + 'static) -> Self {
        Self { inner: RwLock::new(Box::new(sink)) }
    }

    /// Replace the underlying sink.
    pub fn replace(&self, sink: impl AuditSink + 'static) {
        *self.inner.write().expect("audit sink handle lock poisoned") = Box::new(sink);
    }
}

impl AuditSink for AuditSinkHandle {
    fn record(&self, event: AuditEvent) {
        self.inner.read().expect("audit sink handle lock poisoned").record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn pack_metrics_records_invocations_and_denials() {
        let mut metrics = PackMetrics::new("pack-1", "1.0.0");
        metrics.record_invocation(t(0));
        metrics.record_invocation(t(10));
        metrics.record_denial("tool not declared");

        assert_eq!(metrics.invocation_count, 2);
        assert_eq!(metrics.last_invoked_at, Some(t(10)));
        assert_eq!(metrics.deny_count, 1);
        assert_eq!(metrics.last_deny_reason.as_deref(), Some("tool not declared"));
    }

    #[test]
    fn pack_metrics_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackMetricsStore::new(dir.path());

        let mut metrics = store.load("pack-1", "1.0.0").unwrap();
        assert_eq!(metrics.invocation_count, 0);
        metrics.record_invocation(t(0));
        store.save(&metrics).unwrap();

        let reloaded = store.load("pack-1", "1.0.0").unwrap();
        assert_eq!(reloaded.invocation_count, 1);
    }

    #[test]
    fn pack_metrics_store_lands_at_expected_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackMetricsStore::new(dir.path());
        let metrics = PackMetrics::new("pack-x", "2.0.0");
        store.save(&metrics).unwrap();

        assert!(dir.path().join("telemetry").join("packs").join("pack-x.json").exists());
    }

    #[test]
    fn in_memory_audit_sink_records_events() {
        let sink = InMemoryAuditSink::new();
        sink.record(AuditEvent {
            component: "handshake".into(),
            code: "COMPLETED".into(),
            reason: "ok".into(),
            node_id: Some("node-a".into()),
            correlation_id: None,
            timestamp: t(0),
        });
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn composite_sink_forwards_to_memory() {
        let sink = CompositeAuditSink::new();
        sink.record(AuditEvent {
            component: "delegator".into(),
            code: "ACCEPTED".into(),
            reason: "ok".into(),
            node_id: None,
            correlation_id: Some("corr-1".into()),
            timestamp: t(0),
        });
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].code, "ACCEPTED");
    }

    #[test]
    fn audit_sink_handle_can_be_replaced() {
        let handle = AuditSinkHandle::new(InMemoryAuditSink::new());
        handle.record(AuditEvent {
            component: "policy".into(),
            code: "WARN".into(),
            reason: "undeclared tool".into(),
            node_id: None,
            correlation_id: None,
            timestamp: t(0),
        });

        let replacement = InMemoryAuditSink::new();
        handle.replace(replacement);
        handle.record(AuditEvent {
            component: "policy".into(),
            code: "WARN".into(),
            reason: "second".into(),
            node_id: None,
            correlation_id: None,
            timestamp: t(1),
        });
    }
}
