//! Connection tracking: per-connection heartbeat and idle sweeping.

use chrono::{DateTime, Duration, Utc};
use reach_core::NodeId;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Opaque identifier for one transport-level connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A fresh, random connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State tracked for one live peer connection.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// The peer this connection belongs to.
    pub peer_id: NodeId,
    /// When the connection was established.
    pub established_at: DateTime<Utc>,
    /// Last time a message (including heartbeat) was observed.
    pub last_activity: DateTime<Utc>,
}

/// Tracks live connections by id, with a peer-id index and idle sweeping.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    by_connection: HashMap<ConnectionId, PeerConnection>,
    by_peer: HashMap<NodeId, ConnectionId>,
}

impl ConnectionTable {
    /// An empty connection table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly established connection to `peer_id`, returning
    /// its new [`ConnectionId`].
    pub fn register(&self, peer_id: NodeId, now: DateTime<Utc>) -> ConnectionId {
        let id = ConnectionId::new();
        let mut inner = self.inner.write().expect("connection table lock poisoned");
        inner.by_peer.insert(peer_id.clone(), id);
        inner.by_connection.insert(id, PeerConnection { peer_id, established_at: now, last_activity: now });
        id
    }

    /// Bump `last_activity` for a connection (e.g. on heartbeat or any
    /// inbound message).
    pub fn touch(&self, id: ConnectionId, now: DateTime<Utc>) {
        if let Some(conn) = self.inner.write().expect("connection table lock poisoned").by_connection.get_mut(&id) {
            conn.last_activity = now;
        }
    }

    /// Look up the connection currently associated with `peer_id`.
    #[must_use]
    pub fn connection_for_peer(&self, peer_id: &NodeId) -> Option<ConnectionId> {
        self.inner.read().expect("connection table lock poisoned").by_peer.get(peer_id).copied()
    }

    /// Remove a connection by id.
    pub fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.write().expect("connection table lock poisoned");
        if let Some(conn) = inner.by_connection.remove(&id) {
            inner.by_peer.remove(&conn.peer_id);
        }
    }

    /// Remove and return every connection idle for longer than
    /// `2 * connection_timeout`, per spec.md §4.11.
    pub fn sweep_idle(&self, connection_timeout: Duration, now: DateTime<Utc>) -> Vec<ConnectionId> {
        let threshold = connection_timeout * crate::IDLE_SWEEP_MULTIPLIER as i32;
        let mut inner = self.inner.write().expect("connection table lock poisoned");
        let stale: Vec<ConnectionId> = inner
            .by_connection
            .iter()
            .filter(|(_, conn)| now - conn.last_activity > threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(conn) = inner.by_connection.remove(id) {
                inner.by_peer.remove(&conn.peer_id);
            }
        }
        stale
    }

    /// Number of currently tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("connection table lock poisoned").by_connection.len()
    }

    /// `true` if no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn register_and_lookup_by_peer() {
        let table = ConnectionTable::new();
        let peer = NodeId::from_string("peer-a");
        let id = table.register(peer.clone(), t(0));
        assert_eq!(table.connection_for_peer(&peer), Some(id));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_removes_only_idle_past_threshold() {
        let table = ConnectionTable::new();
        let stale_peer = NodeId::from_string("stale");
        let fresh_peer = NodeId::from_string("fresh");
        let stale_id = table.register(stale_peer, t(0));
        table.register(fresh_peer.clone(), t(0));
        table.touch(table.connection_for_peer(&fresh_peer).unwrap(), t(50));

        let timeout = Duration::seconds(30);
        let swept = table.sweep_idle(timeout, t(70));
        assert_eq!(swept, vec![stale_id]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_clears_both_indexes() {
        let table = ConnectionTable::new();
        let peer = NodeId::from_string("peer-a");
        let id = table.register(peer.clone(), t(0));
        table.remove(id);
        assert!(table.is_empty());
        assert_eq!(table.connection_for_peer(&peer), None);
    }
}
