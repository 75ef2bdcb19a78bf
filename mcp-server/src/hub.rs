//! Tracks every connected SSE client and turns server-initiated
//! `sampling/createMessage` calls into JSON-RPC requests pushed down the
//! matching SSE stream, correlating the eventual `POST /mcp/message`
//! response back to the waiting caller.
//!
//! Modeled on the teacher's `OutgoingMessageSender`
//! (`mcp-server/src/outgoing_message.rs`): a per-connection request id
//! counter plus a `request_id -> oneshot sender` table. The teacher has
//! exactly one counterpart process per channel pair (stdio); here a
//! single process serves many SSE connections, so the table lives per
//! connection and the hub keys connections by `connection_id`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use axum::response::sse::Event;
use dumpsrv_core::ai::SamplingClient;
use dumpsrv_mcp_types::CreateMessageParams;
use dumpsrv_mcp_types::CreateMessageResult;
use dumpsrv_mcp_types::JSONRPC_VERSION;
use dumpsrv_mcp_types::JSONRPCRequest;
use dumpsrv_mcp_types::RequestId;
use dumpsrv_mcp_types::error_codes;
use dumpsrv_mcp_types::tool::ClientCapabilities;
use dumpsrv_protocol::error::DumpsrvError;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// One live `GET /mcp/sse` stream.
pub struct SseConnection {
    pub connection_id: Uuid,
    sender: mpsc::Sender<Event>,
    next_request_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
    capabilities: RwLock<Option<ClientCapabilities>>,
    in_flight: AtomicUsize,
}

impl SseConnection {
    fn new(connection_id: Uuid, sender: mpsc::Sender<Event>) -> Self {
        Self {
            connection_id,
            sender,
            next_request_id: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            capabilities: RwLock::new(None),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub async fn set_capabilities(&self, capabilities: ClientCapabilities) {
        *self.capabilities.write().await = Some(capabilities);
    }

    pub async fn supports_sampling(&self) -> bool {
        self.capabilities
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.sampling.is_some())
    }

    /// Queue depth for `POST /mcp/message` backpressure (§5): number of
    /// dispatched-but-not-yet-responded requests on this connection.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    async fn push(&self, event: Event) -> Result<(), DumpsrvError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DumpsrvError::TransportLost)
    }

    /// Pushes a JSON-RPC reply (the `dumpsrv-mcp-server::jsonrpc::handle_message`
    /// result for a client-initiated request) onto this connection's SSE
    /// stream, correlated by the id already embedded in `message`.
    pub async fn push_message(&self, message: &dumpsrv_mcp_types::JSONRPCMessage) -> Result<(), DumpsrvError> {
        let body = serde_json::to_string(message).map_err(DumpsrvError::from)?;
        self.push(Event::default().event("message").data(body)).await
    }

    /// Sends a server-initiated JSON-RPC request down the SSE stream and
    /// returns a receiver that completes when the client's `POST
    /// /mcp/message` response for this id is correlated by the hub.
    async fn send_request(&self, method: &str, params: Value) -> Result<oneshot::Receiver<Value>, DumpsrvError> {
        let id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params: Some(params),
        };
        let body = serde_json::to_string(&request).map_err(DumpsrvError::from)?;
        self.push(Event::default().event("message").data(body)).await?;
        Ok(rx)
    }

    /// Completes the pending request matching `id` with the client's
    /// response payload, called from the `POST /mcp/message` handler when
    /// it receives a `JSONRPCMessage::Response`.
    pub async fn complete(&self, id: &RequestId, result: Value) {
        if let Some(tx) = self.pending.lock().await.remove(id) {
            let _ = tx.send(result);
        }
    }

    /// Fails every outstanding request on disconnect.
    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Value::Null);
        }
    }
}

#[async_trait]
impl SamplingClient for SseConnection {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, DumpsrvError> {
        if !self.supports_sampling().await {
            return Err(DumpsrvError::Preconditioned(format!(
                "client has not declared capabilities.sampling.tools (jsonrpc code {})",
                error_codes::METHOD_NOT_FOUND
            )));
        }
        let params_value = serde_json::to_value(params).map_err(DumpsrvError::from)?;
        let rx = self.send_request("sampling/createMessage", params_value).await?;
        let value = rx.await.map_err(|_| DumpsrvError::TransportLost)?;
        if value.is_null() {
            return Err(DumpsrvError::TransportLost);
        }
        serde_json::from_value(value).map_err(DumpsrvError::from)
    }
}

/// Registry of connected SSE clients plus the `session_id ->
/// connection_id` map used to route server-initiated sampling requests
/// (§4.G, §9 Open Question). Populated opportunistically whenever a
/// `tools/call` request's arguments carry a `session_id`; last writer
/// wins, which is fine since a debugger session is driven from one
/// connection at a time in practice.
#[derive(Default)]
pub struct SseHub {
    connections: RwLock<HashMap<Uuid, Arc<SseConnection>>>,
    session_to_connection: RwLock<HashMap<Uuid, Uuid>>,
}

impl SseHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sender: mpsc::Sender<Event>) -> Arc<SseConnection> {
        let connection_id = Uuid::new_v4();
        let connection = Arc::new(SseConnection::new(connection_id, sender));
        self.connections.write().await.insert(connection_id, connection.clone());
        connection
    }

    pub async fn unregister(&self, connection_id: Uuid) {
        if let Some(connection) = self.connections.write().await.remove(&connection_id) {
            connection.fail_all_pending().await;
        }
        self.session_to_connection
            .write()
            .await
            .retain(|_, v| *v != connection_id);
    }

    pub async fn get(&self, connection_id: Uuid) -> Option<Arc<SseConnection>> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    pub async fn bind_session(&self, session_id: Uuid, connection_id: Uuid) {
        self.session_to_connection.write().await.insert(session_id, connection_id);
    }

    pub async fn connection_for_session(&self, session_id: Uuid) -> Option<Arc<SseConnection>> {
        let connection_id = *self.session_to_connection.read().await.get(&session_id)?;
        self.get(connection_id).await
    }
}
