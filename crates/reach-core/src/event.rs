//! Event and event-bundle types for offline sync (spec.md §3, §4.16).

use crate::ids::NodeId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vector clock keyed by node id, used to detect concurrent updates across
/// the mesh without a shared wall clock.
pub type VectorClock = BTreeMap<String, u64>;

/// A single signed fact in the offline-sync event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    /// Unique event id.
    pub id: String,
    /// Application-defined event type tag.
    pub event_type: String,
    /// Node that produced this event.
    pub source_node: NodeId,
    /// Wall-clock time the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Vector clock at the time of recording.
    pub vector_clock: VectorClock,
    /// Opaque event payload.
    pub payload: serde_json::Value,
    /// Ed25519 signature over the canonical hash of this event with
    /// `signature` cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Event {
    /// A copy of this event with `signature` cleared, ready for hashing or
    /// re-signing.
    #[must_use]
    pub fn unsigned(&self) -> Self {
        let mut e = self.clone();
        e.signature = None;
        e
    }
}

/// An ordered, checksummed batch of events exchanged between two nodes
/// during offline sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventBundle {
    /// Sending node.
    pub from: NodeId,
    /// Receiving node.
    pub to: NodeId,
    /// Events, ordered by `(timestamp, id)` ascending.
    pub events: Vec<Event>,
    /// SHA-256 of the canonical serialization of `events` in sorted order.
    pub checksum: String,
    /// Ed25519 signature over `checksum`, from `from`'s key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl EventBundle {
    /// Sort `events` by `(timestamp, id)`, matching the order the checksum
    /// must be computed over.
    pub fn sort_events(&mut self) {
        self.events.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, secs: i64) -> Event {
        Event {
            id: id.into(),
            event_type: "checkpoint".into(),
            source_node: NodeId::from_string("node-a"),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            vector_clock: VectorClock::new(),
            payload: serde_json::json!({"n": id}),
            signature: None,
        }
    }

    #[test]
    fn sort_events_orders_by_timestamp_then_id() {
        let mut bundle = EventBundle {
            from: NodeId::from_string("node-a"),
            to: NodeId::from_string("node-b"),
            events: vec![event("b", 200), event("a", 100), event("c", 100)],
            checksum: String::new(),
            signature: None,
        };
        bundle.sort_events();
        let ids: Vec<_> = bundle.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn unsigned_clears_signature() {
        let mut e = event("a", 1);
        e.signature = Some("sig".into());
        assert_eq!(e.unsigned().signature, None);
    }
}
