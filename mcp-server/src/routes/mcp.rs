//! `GET /mcp/sse` and `POST /mcp/message` (§4.F/G): the JSON-RPC
//! transport itself. Everything else in `routes/` is plain REST
//! sitting alongside this channel.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use axum::routing::get;
use axum::routing::post;
use dumpsrv_mcp_types::JSONRPCMessage;
use dumpsrv_protocol::DumpsrvError;
use futures::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::auth;
use crate::error::ApiError;
use crate::hub::SseHub;
use crate::jsonrpc;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/mcp/sse", get(sse_handler))
        .route("/mcp/message", post(post_message))
}

/// Drops out of scope when the SSE stream itself is dropped (client
/// disconnect or server shutdown), at which point the connection is
/// unregistered and any still-pending server-initiated requests fail
/// `TransportLost` (§4.G).
struct ConnectionGuard {
    hub: Arc<SseHub>,
    connection_id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let connection_id = self.connection_id;
        tokio::spawn(async move { hub.unregister(connection_id).await });
    }
}

/// Opens one long-lived stream and immediately emits the `endpoint`
/// event the client then posts JSON-RPC envelopes back to (§4.F).
async fn sse_handler(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = mpsc::channel(32);
    let connection = state.hub.register(tx).await;
    let connection_id = connection.connection_id;

    let endpoint = format!("/mcp/message?sessionId={connection_id}");
    let endpoint_event = stream::once(async move { Event::default().event("endpoint").data(endpoint) });

    let guard = ConnectionGuard { hub: state.hub.clone(), connection_id };
    let messages = stream::unfold((ReceiverStream::new(rx), guard), |(mut inner, guard)| async move {
        inner.next().await.map(|event| (event, (inner, guard)))
    });

    let combined = endpoint_event.chain(messages).map(Ok);
    Sse::new(combined).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

/// `POST {endpoint}`: `202 Accepted` on any well-formed envelope, the
/// real reply correlated by `id` onto the SSE stream. Backpressure
/// (§5): a connection already at `session_queue_depth_limit`
/// in-flight requests is rejected with `429` before anything is
/// dispatched.
async fn post_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let message = JSONRPCMessage::from_value(body).map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?;
    let connection = state
        .hub
        .get(query.session_id)
        .await
        .ok_or_else(|| DumpsrvError::NotFound(format!("no SSE connection {}", query.session_id)))?;

    if connection.in_flight() >= state.config.session_queue_depth_limit {
        return Err(DumpsrvError::QuotaExceeded("request queue depth exceeded".into()).into());
    }

    let user_id = auth::resolve_user_id(&headers);
    connection.enter();
    let state = state.clone();
    let connection_id = query.session_id;
    tokio::spawn(async move {
        let reply = jsonrpc::handle_message(&state, connection_id, &user_id, message).await;
        if let Some(connection) = state.hub.get(connection_id).await {
            if let Some(reply) = reply {
                let _ = connection.push_message(&reply).await;
            }
            connection.leave();
        }
    });

    Ok(StatusCode::ACCEPTED)
}
