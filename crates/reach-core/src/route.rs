//! Explicit unicast task routing (spec.md §3 "Task Route", §4.12).

use crate::ids::{CorrelationId, NodeId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Relative priority of a routed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoutePriority {
    /// Best-effort.
    Low,
    /// Default.
    Normal,
    /// Preempts normal/low traffic under flow control.
    High,
}

/// A single explicit (never broadcast) task routed between two nodes.
///
/// Invariants enforced by [`reach-router`](../reach_router/index.html), not
/// by this type: target must be non-empty, `origin`'s node id must never
/// repeat in `hops`, and `hops.len() < max_hops`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRoute {
    /// Task id.
    pub task_id: String,
    /// Correlation id threading this task back to its originating request.
    pub correlation_id: CorrelationId,
    /// Node that originated the route.
    pub origin: NodeId,
    /// Sole destination node. Never a broadcast address.
    pub target: NodeId,
    /// Application-defined task type tag.
    pub task_type: String,
    /// Opaque task payload.
    pub payload: serde_json::Value,
    /// Scheduling priority.
    pub priority: RoutePriority,
    /// Time-to-live in seconds since `created_at`.
    pub ttl: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Ordered chain of node ids this route has already passed through.
    pub hops: Vec<NodeId>,
    /// Hard cap on `hops.len()`.
    pub max_hops: u32,
}

impl TaskRoute {
    /// `true` when the target field is populated (non-broadcast invariant).
    #[must_use]
    pub fn has_explicit_target(&self) -> bool {
        !self.target.as_str().is_empty()
    }

    /// `true` when `node` does not already appear in the hop chain.
    #[must_use]
    pub fn is_loop_free_for(&self, node: &NodeId) -> bool {
        !self.hops.contains(node)
    }

    /// `true` when appending one more hop would still stay under
    /// `max_hops`.
    #[must_use]
    pub fn has_hop_budget(&self) -> bool {
        (self.hops.len() as u32) < self.max_hops
    }

    /// Append `node` to the hop chain. Caller must have already checked
    /// [`Self::is_loop_free_for`] and [`Self::has_hop_budget`].
    pub fn push_hop(&mut self, node: NodeId) {
        self.hops.push(node);
    }
}
