//! HTTP+SSE JSON-RPC client for `dumpsrv-server` (§4.F/G, §6): the peer
//! that opens `GET /mcp/sse`, performs the `initialize` handshake, and
//! issues `tools/list`/`tools/call` requests over `POST /mcp/message`.
//!
//! Grounded in the teacher's `ModelClient` (`core/src/client.rs`): a
//! `reqwest::Client` wrapped around an `.eventsource()` stream, with the
//! same retry-with-backoff discipline (`core/src/util.rs::backoff`) for
//! transport loss. What differs from the teacher's one-shot streaming
//! response is that this channel is bidirectional and long-lived: the
//! server can itself issue a `sampling/createMessage` request down the
//! same stream, which this client answers via a caller-supplied
//! [`SamplingHandler`] and posts back as an ordinary JSON-RPC response.

mod backoff;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use dumpsrv_mcp_types::CallToolRequestParams;
use dumpsrv_mcp_types::CallToolResult;
use dumpsrv_mcp_types::ClientCapabilities;
use dumpsrv_mcp_types::CreateMessageParams;
use dumpsrv_mcp_types::CreateMessageResult;
use dumpsrv_mcp_types::Implementation;
use dumpsrv_mcp_types::InitializeParams;
use dumpsrv_mcp_types::InitializeResult;
use dumpsrv_mcp_types::JSONRPC_VERSION;
use dumpsrv_mcp_types::JSONRPCError;
use dumpsrv_mcp_types::JSONRPCErrorError;
use dumpsrv_mcp_types::JSONRPCMessage;
use dumpsrv_mcp_types::JSONRPCRequest;
use dumpsrv_mcp_types::JSONRPCResponse;
use dumpsrv_mcp_types::ListToolsResult;
use dumpsrv_mcp_types::MCP_PROTOCOL_VERSION;
use dumpsrv_mcp_types::RequestId;
use dumpsrv_mcp_types::SamplingCapability;
use dumpsrv_mcp_types::error_codes;
use dumpsrv_protocol::DumpsrvError;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Answers server-initiated `sampling/createMessage` requests (§4.G,
/// §4.I). A client that never passes one to [`McpClient::connect`]
/// simply omits `capabilities.sampling` from its `initialize` call, and
/// the server never targets it with an AI sampling request (§8).
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn handle(&self, params: CreateMessageParams) -> CreateMessageResult;
}

type PendingTable = Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, DumpsrvError>>>>;

struct Shared {
    http: reqwest::Client,
    base_url: String,
    endpoint: RwLock<Option<String>>,
    next_id: AtomicI64,
    pending: PendingTable,
    request_deadline: Duration,
    cancellation: CancellationToken,
}

impl Shared {
    async fn post(&self, message: &JSONRPCMessage) -> Result<(), DumpsrvError> {
        let endpoint = self.endpoint.read().await.clone().ok_or(DumpsrvError::TransportLost)?;
        let response = self
            .http
            .post(&endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| DumpsrvError::Internal(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DumpsrvError::Internal(format!("server returned {}", response.status())))
        }
    }

    /// Sends a client-initiated request and awaits its correlated reply,
    /// failing `Timeout` if `request_deadline` elapses and `TransportLost`
    /// if the connection drops (or was never established) first.
    async fn request(&self, method: &str, params: Value) -> Result<Value, DumpsrvError> {
        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: Some(params),
        });
        if let Err(e) = self.post(&envelope).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DumpsrvError::TransportLost),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DumpsrvError::Timeout(self.request_deadline))
            }
        }
    }

    /// Fails every request still awaiting a reply (§4.G "no re-issuing of
    /// un-acked requests" — a dropped connection fails them outright
    /// rather than silently retrying them on the next one).
    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(DumpsrvError::TransportLost));
        }
    }
}

/// One connection to a `dumpsrv-server` instance.
pub struct McpClient {
    shared: Arc<Shared>,
}

impl McpClient {
    /// Opens `GET {base_url}/mcp/sse`, performs the `initialize`
    /// handshake (§9 Open Question i: always, regardless of whether
    /// `sampling` is passed), and spawns the background task that keeps
    /// reading the stream and reconnects with backoff on transport loss.
    pub async fn connect(
        base_url: impl Into<String>,
        client_info: Implementation,
        sampling: Option<Arc<dyn SamplingHandler>>,
    ) -> Result<Self, DumpsrvError> {
        let base_url = base_url.into();
        let shared = Arc::new(Shared {
            http: reqwest::Client::new(),
            base_url: base_url.clone(),
            endpoint: RwLock::new(None),
            next_id: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            request_deadline: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
        });

        let stream = open_sse_stream(&shared).await?;
        let (stream, endpoint) = wait_for_endpoint(stream).await?;
        *shared.endpoint.write().await = Some(endpoint);
        initialize_handshake(&shared, &client_info, sampling.is_some()).await?;

        tokio::spawn(read_loop(shared.clone(), stream, client_info, sampling));
        Ok(Self { shared })
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult, DumpsrvError> {
        let value = self.shared.request("tools/list", Value::Null).await?;
        serde_json::from_value(value).map_err(DumpsrvError::from)
    }

    pub async fn call_tool(&self, name: impl Into<String>, arguments: Value) -> Result<CallToolResult, DumpsrvError> {
        let params = CallToolRequestParams { name: name.into(), arguments };
        let value = self.shared.request("tools/call", serde_json::to_value(params).map_err(DumpsrvError::from)?).await?;
        serde_json::from_value(value).map_err(DumpsrvError::from)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shared.cancellation.cancel();
    }
}

/// Shared between the initial `connect()` handshake and every
/// reconnect attempt inside `read_loop` (§9 Open Question i: the
/// handshake is never skipped, including after a reconnect).
async fn initialize_handshake(shared: &Shared, client_info: &Implementation, wants_sampling: bool) -> Result<InitializeResult, DumpsrvError> {
    let params = InitializeParams {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        client_info: client_info.clone(),
        capabilities: ClientCapabilities {
            sampling: wants_sampling.then(SamplingCapability::default),
        },
    };
    let value = shared.request("initialize", serde_json::to_value(params).map_err(DumpsrvError::from)?).await?;
    serde_json::from_value(value).map_err(DumpsrvError::from)
}

type EventStream = std::pin::Pin<Box<dyn Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>;

async fn open_sse_stream(shared: &Shared) -> Result<EventStream, DumpsrvError> {
    let url = format!("{}/mcp/sse", shared.base_url.trim_end_matches('/'));
    let response = shared
        .http
        .get(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| DumpsrvError::Internal(e.to_string()))?;
    if !response.status().is_success() {
        return Err(DumpsrvError::Internal(format!("GET {url} returned {}", response.status())));
    }
    Ok(Box::pin(response.bytes_stream().eventsource()))
}

/// Consumes events until one arrives labeled `endpoint` (§6 SSE
/// framing), returning the resolved absolute POST URL plus the stream
/// positioned right after it.
async fn wait_for_endpoint(mut stream: EventStream) -> Result<(EventStream, String), DumpsrvError> {
    match stream.next().await {
        Some(Ok(event)) if event.event == "endpoint" => Ok((stream, event.data)),
        Some(Ok(_)) => Err(DumpsrvError::Internal("expected 'endpoint' as the first SSE event".into())),
        Some(Err(e)) => Err(DumpsrvError::Internal(e.to_string())),
        None => Err(DumpsrvError::TransportLost),
    }
}

/// Owns the live stream after the handshake: dispatches `message`
/// events, answers server-initiated requests via `sampling`, and on
/// disconnect fails every pending request, then reconnects with
/// exponential backoff (mirroring the teacher's retry loop in
/// `ModelClient::stream`) until cancelled by [`McpClient`]'s `Drop`.
async fn read_loop(shared: Arc<Shared>, mut stream: EventStream, client_info: Implementation, sampling: Option<Arc<dyn SamplingHandler>>) {
    let mut attempt: u64 = 0;
    loop {
        loop {
            let next = tokio::select! {
                () = shared.cancellation.cancelled() => return,
                item = stream.next() => item,
            };
            match next {
                Some(Ok(event)) => {
                    attempt = 0;
                    dispatch_event(&shared, &event.data, &sampling).await;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "SSE stream error, reconnecting");
                    break;
                }
                None => {
                    tracing::warn!("SSE stream closed, reconnecting");
                    break;
                }
            }
        }

        shared.fail_all_pending().await;
        *shared.endpoint.write().await = None;

        loop {
            attempt += 1;
            let delay = backoff::backoff(attempt);
            tokio::select! {
                () = shared.cancellation.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let reconnected = async {
                let new_stream = open_sse_stream(&shared).await?;
                let (new_stream, endpoint) = wait_for_endpoint(new_stream).await?;
                *shared.endpoint.write().await = Some(endpoint);
                initialize_handshake(&shared, &client_info, sampling.is_some()).await?;
                Ok::<_, DumpsrvError>(new_stream)
            }
            .await;

            match reconnected {
                Ok(new_stream) => {
                    stream = new_stream;
                    break;
                }
                Err(e) => {
                    *shared.endpoint.write().await = None;
                    tracing::warn!(error = %e, attempt, "reconnect attempt failed");
                }
            }
        }
    }
}

async fn dispatch_event(shared: &Arc<Shared>, data: &str, sampling: &Option<Arc<dyn SamplingHandler>>) {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse SSE message payload");
            return;
        }
    };
    let message = match JSONRPCMessage::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "malformed jsonrpc envelope on SSE stream");
            return;
        }
    };

    match message {
        JSONRPCMessage::Response(response) => {
            if let Some(tx) = shared.pending.lock().await.remove(&response.id) {
                let _ = tx.send(Ok(response.result));
            }
        }
        JSONRPCMessage::Error(error) => {
            if let Some(tx) = shared.pending.lock().await.remove(&error.id) {
                let _ = tx.send(Err(DumpsrvError::Internal(format!("{}: {}", error.error.code, error.error.message))));
            }
        }
        JSONRPCMessage::Request(request) if request.method == "sampling/createMessage" => {
            let shared = shared.clone();
            let sampling = sampling.clone();
            tokio::spawn(async move {
                let reply = answer_sampling_request(request, sampling).await;
                let _ = shared.post(&reply).await;
            });
        }
        JSONRPCMessage::Request(request) => {
            tracing::debug!(method = %request.method, "unsupported server-initiated request");
        }
        JSONRPCMessage::Notification(_) => {}
    }
}

async fn answer_sampling_request(request: JSONRPCRequest, sampling: Option<Arc<dyn SamplingHandler>>) -> JSONRPCMessage {
    let Some(handler) = sampling else {
        return JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id,
            error: JSONRPCErrorError {
                code: error_codes::METHOD_NOT_FOUND,
                message: "client declared no sampling capability".to_string(),
                data: None,
            },
        });
    };
    let params: CreateMessageParams = match request.params.map(serde_json::from_value).transpose() {
        Ok(Some(p)) => p,
        Ok(None) | Err(_) => {
            return JSONRPCMessage::Error(JSONRPCError {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: request.id,
                error: JSONRPCErrorError {
                    code: error_codes::INVALID_PARAMS,
                    message: "missing or malformed sampling/createMessage params".to_string(),
                    data: None,
                },
            });
        }
    };

    let result = handler.handle(params).await;
    match serde_json::to_value(result) {
        Ok(result) => JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id,
            result,
        }),
        Err(e) => JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id,
            error: JSONRPCErrorError {
                code: error_codes::INTERNAL_ERROR,
                message: e.to_string(),
                data: None,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSampling;

    #[async_trait]
    impl SamplingHandler for EchoSampling {
        async fn handle(&self, params: CreateMessageParams) -> CreateMessageResult {
            CreateMessageResult {
                role: dumpsrv_mcp_types::SamplingRole::Assistant,
                content: dumpsrv_mcp_types::SamplingContent::Text {
                    text: format!("handled {} messages", params.messages.len()),
                },
                model: "test-model".to_string(),
                stop_reason: "endTurn".to_string(),
            }
        }
    }

    async fn spawn_test_server() -> String {
        let dir = tempfile::tempdir().unwrap();
        let mut config = dumpsrv_core::Config::default();
        config.storage_dir = dir.path().to_path_buf();
        let state = dumpsrv_mcp_server::build_state(config).await.unwrap();
        let app = dumpsrv_mcp_server::router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn test_client_info() -> Implementation {
        Implementation { name: "dumpsrv-client-tests".to_string(), version: "0.0.0".to_string() }
    }

    #[tokio::test]
    async fn connect_performs_handshake_and_lists_tools() {
        let base_url = spawn_test_server().await;
        let client = McpClient::connect(base_url, test_client_info(), None).await.unwrap();

        let tools = client.list_tools().await.unwrap();
        assert!(!tools.tools.is_empty());
        assert!(tools.tools.iter().any(|t| t.name == "session"));
    }

    #[tokio::test]
    async fn call_tool_round_trips_through_the_server() {
        let base_url = spawn_test_server().await;
        let client = McpClient::connect(base_url, test_client_info(), None).await.unwrap();

        let result = client
            .call_tool("session", serde_json::json!({"action": "create", "user_id": "u1"}))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn connect_without_sampling_omits_capability() {
        let base_url = spawn_test_server().await;
        let client = McpClient::connect(base_url, test_client_info(), Some(Arc::new(EchoSampling))).await.unwrap();
        // A client that declares sampling still answers ordinary tool calls.
        let tools = client.list_tools().await.unwrap();
        assert!(!tools.tools.is_empty());
    }
}
