// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable, machine-readable error codes for the
//! Reach mesh core.
//!
//! Every [`ReachError`] carries a stable [`ErrorCode`], a user-safe message,
//! an optional suggestion, a `deterministic` flag, an optional cause, a
//! redacted context map, a UTC timestamp, and a `retryable` flag derived
//! from the code. Context values are scrubbed against a fixed set of secret
//! patterns before they are ever stored, so a `ReachError` is always safe to
//! log or ship across a trust boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod redact;

pub use redact::redact_str;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Generic / cross-cutting errors.
    General,
    /// Pack/task execution errors.
    Execution,
    /// Policy gate decisions.
    Policy,
    /// Signature and integrity verification.
    Signature,
    /// Capability registry compatibility.
    Registry,
    /// Mesh / federated delegation errors.
    Federation,
    /// Deterministic-replay guard errors.
    Replay,
    /// Configuration errors.
    Config,
    /// Durable storage errors.
    Storage,
    /// Sandbox / host policy violations.
    Sandbox,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::General => "general",
            Self::Execution => "execution",
            Self::Policy => "policy",
            Self::Signature => "signature",
            Self::Registry => "registry",
            Self::Federation => "federation",
            Self::Replay => "replay",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Sandbox => "sandbox",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serializes to a `SCREAMING_SNAKE_CASE` string that will not
/// change across patch releases. See [`ErrorCode::category`] for the broad
/// family and [`ErrorCode::is_retryable`] for the default retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- General --
    /// Unclassified error.
    Unknown,
    /// Unexpected internal error.
    Internal,
    /// Caller-supplied argument failed validation.
    InvalidArgument,
    /// Operation did not complete before its deadline.
    Timeout,
    /// Operation was cancelled by its caller.
    Cancelled,
    /// A bounded resource (semaphore, queue, budget) is exhausted.
    ResourceExhausted,
    /// A rate limiter rejected the request.
    RateLimitExceeded,

    // -- Execution --
    /// Pack/tool execution failed for a reason other than denial.
    ExecutionFailed,
    /// Execution exceeded its wall-clock budget.
    ExecutionTimeout,
    /// A requested tool is not in the pack's declared allowlist.
    ToolDenied,
    /// A requested permission is not in the pack's declared allowlist.
    PermissionDenied,
    /// The autonomous loop could not persist a checkpoint.
    CheckpointFailed,

    // -- Policy --
    /// The policy gate denied the request.
    PolicyDenied,
    /// The requested tool was never declared by the pack.
    PolicyUndeclaredTool,
    /// Requested permission scope exceeds what policy allows.
    PolicyPermissionEscalation,
    /// Policy requires determinism but the pack/request is non-deterministic.
    PolicyDeterminismRequired,

    // -- Signature --
    /// Recomputed signature/hash does not match the stored value.
    SignatureInvalid,
    /// No signature present where one is required.
    SignatureMissing,

    // -- Registry --
    /// Pack's major version exceeds the registry's supported window.
    VersionMismatch,
    /// A declared tool has no registered capability backing it.
    CapabilityUnmapped,

    // -- Federation --
    /// The circuit breaker for a peer/origin is open.
    CircuitOpen,
    /// A remote node could not be reached.
    NodeUnreachable,
    /// Spec-version tags are incompatible between peers.
    SpecMismatch,
    /// A replayed message/response was detected.
    ReplayMismatch,
    /// Retry budget exhausted without success.
    MaxRetriesExceeded,
    /// The peer is quarantined and cannot be delegated to.
    NodeQuarantined,
    /// Delegating work to a peer failed.
    DelegationFailed,
    /// Envelope's pack identity does not match the executor's pack.
    PackMismatch,
    /// Runtime spec version is outside the pack's supported set.
    SpecVersionIncompatible,

    // -- Replay --
    /// A replay envelope's snapshot hashes do not match the executor's.
    ReplaySnapshotMismatch,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Storage --
    /// Requested record does not exist.
    StorageNotFound,
    /// Reading durable storage failed.
    StorageReadFailed,
    /// Writing durable storage failed.
    StorageWriteFailed,

    // -- Sandbox --
    /// A host-enforced sandbox boundary was violated.
    SandboxViolation,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            Unknown | Internal | InvalidArgument | Timeout | Cancelled | ResourceExhausted
            | RateLimitExceeded => ErrorCategory::General,

            ExecutionFailed | ExecutionTimeout | ToolDenied | PermissionDenied
            | CheckpointFailed => ErrorCategory::Execution,

            PolicyDenied | PolicyUndeclaredTool | PolicyPermissionEscalation
            | PolicyDeterminismRequired => ErrorCategory::Policy,

            SignatureInvalid | SignatureMissing => ErrorCategory::Signature,

            VersionMismatch | CapabilityUnmapped => ErrorCategory::Registry,

            CircuitOpen | NodeUnreachable | SpecMismatch | ReplayMismatch
            | MaxRetriesExceeded | NodeQuarantined | DelegationFailed | PackMismatch
            | SpecVersionIncompatible => ErrorCategory::Federation,

            ReplaySnapshotMismatch => ErrorCategory::Replay,

            ConfigInvalid => ErrorCategory::Config,

            StorageNotFound | StorageReadFailed | StorageWriteFailed => ErrorCategory::Storage,

            SandboxViolation => ErrorCategory::Sandbox,
        }
    }

    /// Default retry policy for this code (spec.md §7).
    ///
    /// Pack/policy failures are never retried; network and storage errors
    /// are retried per the caller's backoff policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::NodeUnreachable
                | ErrorCode::DelegationFailed
                | ErrorCode::StorageReadFailed
                | ErrorCode::StorageWriteFailed
                | ErrorCode::ResourceExhausted
                | ErrorCode::ExecutionTimeout
        )
    }

    /// Stable `&'static str` representation (e.g. `"PACK_MISMATCH"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            Unknown => "UNKNOWN",
            Internal => "INTERNAL",
            InvalidArgument => "INVALID_ARGUMENT",
            Timeout => "TIMEOUT",
            Cancelled => "CANCELLED",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ExecutionFailed => "EXECUTION_FAILED",
            ExecutionTimeout => "EXECUTION_TIMEOUT",
            ToolDenied => "TOOL_DENIED",
            PermissionDenied => "PERMISSION_DENIED",
            CheckpointFailed => "CHECKPOINT_FAILED",
            PolicyDenied => "POLICY_DENIED",
            PolicyUndeclaredTool => "POLICY_UNDECLARED_TOOL",
            PolicyPermissionEscalation => "POLICY_PERMISSION_ESCALATION",
            PolicyDeterminismRequired => "POLICY_DETERMINISM_REQUIRED",
            SignatureInvalid => "SIGNATURE_INVALID",
            SignatureMissing => "SIGNATURE_MISSING",
            VersionMismatch => "VERSION_MISMATCH",
            CapabilityUnmapped => "CAPABILITY_UNMAPPED",
            CircuitOpen => "CIRCUIT_OPEN",
            NodeUnreachable => "NODE_UNREACHABLE",
            SpecMismatch => "SPEC_MISMATCH",
            ReplayMismatch => "REPLAY_MISMATCH",
            MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            NodeQuarantined => "NODE_QUARANTINED",
            DelegationFailed => "DELEGATION_FAILED",
            PackMismatch => "PACK_MISMATCH",
            SpecVersionIncompatible => "SPEC_VERSION_INCOMPATIBLE",
            ReplaySnapshotMismatch => "REPLAY_SNAPSHOT_MISMATCH",
            ConfigInvalid => "CONFIG_INVALID",
            StorageNotFound => "STORAGE_NOT_FOUND",
            StorageReadFailed => "STORAGE_READ_FAILED",
            StorageWriteFailed => "STORAGE_WRITE_FAILED",
            SandboxViolation => "SANDBOX_VIOLATION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ReachError
// ---------------------------------------------------------------------------

/// Unified Reach error.
///
/// # Examples
///
/// ```
/// use reach_error::{ReachError, ErrorCode};
///
/// let err = ReachError::new(ErrorCode::NodeUnreachable, "peer did not respond")
///     .with_context("node_id", "n-1234")
///     .with_suggestion("retry with backoff");
/// assert!(err.retryable);
/// ```
pub struct ReachError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable, user-safe message.
    pub message: String,
    /// Optional human-readable remediation suggestion.
    pub suggestion: Option<String>,
    /// Whether the operation that produced this error is deterministic
    /// (i.e. repeating it with the same inputs reproduces the same error).
    pub deterministic: bool,
    /// Optional underlying cause (kept out of `Display`/`Serialize`).
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary, pre-redacted structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
    /// UTC timestamp the error was constructed at.
    pub timestamp: DateTime<Utc>,
    /// Whether the caller's retry policy should retry this error.
    pub retryable: bool,
}

impl ReachError {
    /// Create a new error with the given code and message.
    ///
    /// `retryable` defaults to [`ErrorCode::is_retryable`] for `code`.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: code.is_retryable(),
            code,
            message: message.into(),
            suggestion: None,
            deterministic: true,
            source: None,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// String values are passed through [`redact_str`] before storage; the
    /// value is then converted via [`serde_json::to_value`] and silently
    /// skipped if serialization fails.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            let redacted = redact::redact_json(v);
            self.context.insert(key.into(), redacted);
        }
        self
    }

    /// Attach a remediation suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Mark this error as non-deterministic (repeating the operation may
    /// produce a different outcome).
    #[must_use]
    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    /// Override the default retryable flag for this code.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Safe JSON projection: code, message, suggestion, and redacted
    /// context only. The cause chain never leaves this boundary.
    #[must_use]
    pub fn to_safe_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code.as_str(),
            "message": self.message,
            "suggestion": self.suggestion,
            "retryable": self.retryable,
            "deterministic": self.deterministic,
            "context": self.context,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

impl fmt::Debug for ReachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ReachError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        d.field("retryable", &self.retryable);
        if let Some(ref s) = self.suggestion {
            d.field("suggestion", s);
        }
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ReachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (suggestion: {s})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReachError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
