// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-core
//!
//! The stable data-model contract for the Reach mesh core: execution
//! envelopes, task routes, capabilities, peer/node identity, correlation
//! ids, and the event/event-bundle pair used by offline sync.
//!
//! If you only take one dependency from this workspace, take this one —
//! every other `reach-*` crate builds on these types.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Correlation id and node id primitives.
pub mod ids;
/// Capability and capability-manifest types (registry entries).
pub mod capability;
/// Execution envelope / context carried into a pack executor call.
pub mod envelope;
/// Autonomous-loop session state.
pub mod session;
/// Explicit unicast task routing.
pub mod route;
/// Event and event-bundle types for offline sync.
pub mod event;
/// Node identity, peer record, and trust level.
pub mod peer;

pub use capability::{Capability, CapabilityManifest, CapabilityRequirements, SupportLevel};
pub use envelope::{ExecutionContext, ExecutionEnvelope};
pub use event::{Event, EventBundle};
pub use ids::{CorrelationId, NodeId};
pub use peer::{PeerRecord, TrustLevel};
pub use route::{RoutePriority, TaskRoute};
pub use session::AutonomousSession;

/// Contract/spec-version tag embedded in every pack, envelope, and receipt.
///
/// # Examples
///
/// ```
/// assert_eq!(reach_core::SPEC_VERSION, "reach/v1");
/// ```
pub const SPEC_VERSION: &str = "reach/v1";

/// Spec-version tags this runtime build accepts (spec.md §4.2).
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &["reach/v1"];

/// Returns `true` if `tag` is one of [`SUPPORTED_SPEC_VERSIONS`].
#[must_use]
pub fn is_spec_version_supported(tag: &str) -> bool {
    SUPPORTED_SPEC_VERSIONS.contains(&tag)
}
