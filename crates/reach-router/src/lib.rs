// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-router
//!
//! Validates incoming [`TaskRoute`]s per spec.md §4.12's fixed check order,
//! then dispatches locally or forwards toward the target node.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reach_core::{NodeId, TaskRoute};
use reach_error::{ErrorCode, ReachError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Result of routing one [`TaskRoute`] to completion.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Dispatched locally and completed with this result value.
    Executed(serde_json::Value),
    /// No handler is registered for the route's task type.
    Rejected(String),
    /// Appended to the hop chain and handed to the forwarder for the
    /// remote target.
    Forwarded,
}

/// Executes routes addressed to the local node.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute `route` and return its result payload.
    async fn handle(&self, route: &TaskRoute) -> Result<serde_json::Value, ReachError>;
}

/// Sends a route on toward a remote target, e.g. via `reach-transport`.
#[async_trait]
pub trait RouteForwarder: Send + Sync {
    /// Forward `route`, which already carries the local node in its hop
    /// chain, to `route.target`.
    async fn forward(&self, route: &TaskRoute) -> Result<(), ReachError>;
}

/// Validates, dedups, and dispatches/forwards task routes for one node.
pub struct TaskRouter<F: RouteForwarder> {
    local_node_id: NodeId,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
    forwarder: F,
}

impl<F: RouteForwarder> TaskRouter<F> {
    /// A router for `local_node_id` that forwards remote-bound routes via
    /// `forwarder`.
    pub fn new(local_node_id: NodeId, forwarder: F) -> Self {
        Self { local_node_id, handlers: RwLock::new(HashMap::new()), seen: RwLock::new(HashMap::new()), forwarder }
    }

    /// Register (or replace) the handler for `task_type`.
    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().expect("router handlers lock poisoned").insert(task_type.into(), handler);
    }

    /// Validate `route` per spec.md §4.12's fixed check order.
    ///
    /// # Errors
    /// Returns the first failing check as a [`ReachError`].
    pub fn validate(&self, route: &TaskRoute, now: DateTime<Utc>) -> Result<(), ReachError> {
        if route.task_id.is_empty() {
            return Err(ReachError::new(ErrorCode::InvalidArgument, "task_id must not be empty"));
        }
        if !route.has_explicit_target() {
            return Err(ReachError::new(ErrorCode::InvalidArgument, "target_node_id must not be empty"));
        }
        if route.task_type.is_empty() {
            return Err(ReachError::new(ErrorCode::InvalidArgument, "task_type must not be empty"));
        }
        if route.origin.as_str().is_empty() {
            return Err(ReachError::new(ErrorCode::InvalidArgument, "origin_node_id must not be empty"));
        }
        if now - route.created_at > Duration::seconds(i64::from(route.ttl)) {
            return Err(ReachError::new(ErrorCode::Timeout, "task route ttl exceeded"));
        }
        if !route.is_loop_free_for(&self.local_node_id) {
            return Err(ReachError::new(ErrorCode::InvalidArgument, "task route already visited this node"));
        }
        if !route.has_hop_budget() {
            return Err(ReachError::new(ErrorCode::ResourceExhausted, "task route exceeded max_hops"));
        }
        if self.seen.read().expect("router seen lock poisoned").contains_key(&route.task_id) {
            return Err(ReachError::new(ErrorCode::ReplayMismatch, "duplicate task_id"));
        }
        Ok(())
    }

    /// Validate, then dispatch locally or forward toward the remote target.
    ///
    /// # Errors
    /// Propagates [`Self::validate`] failures and forwarder/handler errors.
    pub async fn route(&self, mut route: TaskRoute, now: DateTime<Utc>) -> Result<RouteOutcome, ReachError> {
        self.validate(&route, now)?;
        self.seen.write().expect("router seen lock poisoned").insert(route.task_id.clone(), now);

        if route.target == self.local_node_id {
            let handler = self.handlers.read().expect("router handlers lock poisoned").get(&route.task_type).cloned();
            let Some(handler) = handler else {
                return Ok(RouteOutcome::Rejected(format!("no handler registered for task type {}", route.task_type)));
            };
            // Clone the Arc out and drop the read guard before awaiting, so a slow
            // handler never holds up concurrent `register_handler`/`route` calls.
            handler.handle(&route).await.map(RouteOutcome::Executed)
        } else {
            route.push_hop(self.local_node_id.clone());
            self.forwarder.forward(&route).await?;
            Ok(RouteOutcome::Forwarded)
        }
    }

    /// Remove dedup entries older than `max_age`.
    pub fn cleanup_seen(&self, max_age: Duration, now: DateTime<Utc>) {
        self.seen.write().expect("router seen lock poisoned").retain(|_, seen_at| now - *seen_at <= max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_core::{CorrelationId, RoutePriority};

    struct EchoHandler;
    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, route: &TaskRoute) -> Result<serde_json::Value, ReachError> {
            Ok(route.payload.clone())
        }
    }

    struct RecordingForwarder {
        forwarded: std::sync::Mutex<Vec<TaskRoute>>,
    }
    impl RecordingForwarder {
        fn new() -> Self {
            Self { forwarded: std::sync::Mutex::new(Vec::new()) }
        }
    }
    #[async_trait]
    impl RouteForwarder for RecordingForwarder {
        async fn forward(&self, route: &TaskRoute) -> Result<(), ReachError> {
            self.forwarded.lock().unwrap().push(route.clone());
            Ok(())
        }
    }

    fn route(target: &str) -> TaskRoute {
        TaskRoute {
            task_id: "task-1".into(),
            correlation_id: CorrelationId::new(),
            origin: NodeId::from_string("node-a"),
            target: NodeId::from_string(target),
            task_type: "echo".into(),
            payload: serde_json::json!({"x": 1}),
            priority: RoutePriority::Normal,
            ttl: 300,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            hops: vec![],
            max_hops: 5,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_010, 0).unwrap()
    }

    #[tokio::test]
    async fn local_route_dispatches_to_handler() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        router.register_handler("echo", Arc::new(EchoHandler));
        let outcome = router.route(route("node-local"), now()).await.unwrap();
        match outcome {
            RouteOutcome::Executed(v) => assert_eq!(v, serde_json::json!({"x": 1})),
            other => panic!("expected Executed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_route_without_handler_is_rejected() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        let outcome = router.route(route("node-local"), now()).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn remote_route_is_forwarded_with_local_hop_appended() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        let outcome = router.route(route("node-remote"), now()).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Forwarded));
    }

    #[tokio::test]
    async fn duplicate_task_id_rejected_on_second_route() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        router.register_handler("echo", Arc::new(EchoHandler));
        router.route(route("node-local"), now()).await.unwrap();
        let err = router.validate(&route("node-local"), now()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ReplayMismatch);
    }

    #[test]
    fn empty_task_id_rejected() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        let mut r = route("node-local");
        r.task_id = String::new();
        assert_eq!(router.validate(&r, now()).unwrap_err().code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn expired_ttl_rejected() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        let r = route("node-local");
        let far_future = DateTime::from_timestamp(1_700_000_000 + 301, 0).unwrap();
        assert_eq!(router.validate(&r, far_future).unwrap_err().code, ErrorCode::Timeout);
    }

    #[test]
    fn cleanup_seen_removes_stale_entries() {
        let router = TaskRouter::new(NodeId::from_string("node-local"), RecordingForwarder::new());
        router.seen.write().unwrap().insert("old".into(), now());
        router.cleanup_seen(Duration::seconds(5), now() + Duration::seconds(10));
        assert!(!router.seen.read().unwrap().contains_key("old"));
    }
}
