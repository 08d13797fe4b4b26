//! HTTP fallback transport: `GET /mesh/health`, `POST /mesh/push`, `GET
//! /mesh/poll`, for environments where the stream transport isn't usable.

use crate::message::Message;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use reach_core::NodeId;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared state backing the HTTP fallback endpoints: a per-recipient inbox
/// of messages awaiting poll.
#[derive(Clone, Default)]
pub struct HttpTransportState {
    inbox: Arc<RwLock<HashMap<NodeId, VecDeque<Message>>>>,
}

impl HttpTransportState {
    /// An empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build the `/mesh/*` fallback router.
#[must_use]
pub fn http_router(state: HttpTransportState) -> Router {
    Router::new()
        .route("/mesh/health", get(mesh_health))
        .route("/mesh/push", post(mesh_push))
        .route("/mesh/poll", get(mesh_poll))
        .with_state(state)
}

async fn mesh_health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

async fn mesh_push(State(state): State<HttpTransportState>, Json(message): Json<Message>) -> Response {
    let mut inbox = state.inbox.write().await;
    inbox.entry(message.to.clone()).or_default().push_back(message);
    StatusCode::ACCEPTED.into_response()
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    node_id: String,
}

async fn mesh_poll(State(state): State<HttpTransportState>, Query(query): Query<PollQuery>) -> Json<Vec<Message>> {
    let node_id = NodeId::from_string(query.node_id);
    let mut inbox = state.inbox.write().await;
    let drained = inbox.remove(&node_id).map(Vec::from).unwrap_or_default();
    Json(drained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn sample_message(to: &str) -> Message {
        Message {
            id: uuid::Uuid::nil(),
            message_type: MessageType::Ping,
            from: NodeId::from_string("node-a"),
            to: NodeId::from_string(to),
            payload: json!({"seq": 1}),
            timestamp: Utc::now(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = http_router(HttpTransportState::new());
        let response = app.oneshot(Request::get("/mesh/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn push_then_poll_drains_inbox() {
        let state = HttpTransportState::new();
        let app = http_router(state);
        let message = sample_message("node-b");
        let push_req = Request::post("/mesh/push")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&message).unwrap()))
            .unwrap();
        let push_res = app.clone().oneshot(push_req).await.unwrap();
        assert_eq!(push_res.status(), StatusCode::ACCEPTED);

        let poll_req = Request::get("/mesh/poll?node_id=node-b").body(Body::empty()).unwrap();
        let poll_res = app.clone().oneshot(poll_req).await.unwrap();
        assert_eq!(poll_res.status(), StatusCode::OK);

        let poll_req_again = Request::get("/mesh/poll?node_id=node-b").body(Body::empty()).unwrap();
        let poll_res_again = app.oneshot(poll_req_again).await.unwrap();
        let body = axum::body::to_bytes(poll_res_again.into_body(), usize::MAX).await.unwrap();
        let drained: Vec<Message> = serde_json::from_slice(&body).unwrap();
        assert!(drained.is_empty());
    }
}
