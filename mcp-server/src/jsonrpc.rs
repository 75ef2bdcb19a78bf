//! JSON-RPC envelope handling for `POST {endpoint}` (§4.F/G): parses
//! one envelope, dispatches it, and returns the JSON-RPC reply that the
//! caller pushes onto the matching SSE stream. `initialize`/`tools/list`/
//! `tools/call` are handled here directly; a client's `result`/`error`
//! reply to a server-initiated `sampling/createMessage` request is
//! routed back to the [`crate::hub::SseConnection`] that is still
//! awaiting it.

use std::sync::Arc;

use dumpsrv_mcp_types::CallToolRequestParams;
use dumpsrv_mcp_types::InitializeParams;
use dumpsrv_mcp_types::InitializeResult;
use dumpsrv_mcp_types::Implementation;
use dumpsrv_mcp_types::JSONRPCError;
use dumpsrv_mcp_types::JSONRPCErrorError;
use dumpsrv_mcp_types::JSONRPCMessage;
use dumpsrv_mcp_types::JSONRPCResponse;
use dumpsrv_mcp_types::JSONRPC_VERSION;
use dumpsrv_mcp_types::ListToolsResult;
use dumpsrv_mcp_types::RequestId;
use dumpsrv_mcp_types::ServerCapabilities;
use dumpsrv_mcp_types::error_codes;
use dumpsrv_mcp_types::MCP_PROTOCOL_VERSION;
use dumpsrv_protocol::DumpsrvError;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

fn error_response(id: RequestId, code: i64, message: impl Into<String>) -> JSONRPCMessage {
    JSONRPCMessage::Error(JSONRPCError {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        error: JSONRPCErrorError {
            code,
            message: message.into(),
            data: None,
        },
    })
}

fn ok_response(id: RequestId, result: Value) -> JSONRPCMessage {
    JSONRPCMessage::Response(JSONRPCResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result,
    })
}

/// Handles one `initialize` request: the client declares
/// `capabilities.sampling`, which this hub records against the
/// connection so later `sampling/createMessage` calls know they can
/// target it (§9 Open Question i: every client performs this handshake
/// before any other request, no "bare" mode).
async fn handle_initialize(state: &AppState, connection_id: Uuid, params: Value) -> Result<Value, DumpsrvError> {
    let params: InitializeParams = serde_json::from_value(params).map_err(DumpsrvError::from)?;
    if let Some(connection) = state.hub.get(connection_id).await {
        connection.set_capabilities(params.capabilities).await;
    }
    let result = InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        server_info: Implementation {
            name: "dumpsrv".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: ServerCapabilities { tools: Some(json!({})) },
    };
    serde_json::to_value(result).map_err(DumpsrvError::from)
}

fn handle_tools_list() -> Result<Value, DumpsrvError> {
    let result = ListToolsResult {
        tools: dumpsrv_core::tools::tool_specs(),
        next_cursor: None,
    };
    serde_json::to_value(result).map_err(DumpsrvError::from)
}

async fn handle_tools_call(state: &AppState, user_id: &str, params: Value) -> Result<Value, DumpsrvError> {
    let params: CallToolRequestParams = serde_json::from_value(params).map_err(DumpsrvError::from)?;
    let result = dumpsrv_core::tools::dispatch(&state.tools, user_id, params).await;
    serde_json::to_value(result).map_err(DumpsrvError::from)
}

/// Binds `session_id` (lifted out of `tools/call` arguments, when
/// present) to this connection so the AI sampling orchestrator's
/// `sampling_for_session` lookup can route back here (§4.G).
async fn maybe_bind_session(state: &AppState, connection_id: Uuid, method: &str, params: &Value) {
    if method != "tools/call" {
        return;
    }
    let Some(session_id) = params
        .get("arguments")
        .and_then(|a| a.get("session_id").or_else(|| a.get("sessionId")))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return;
    };
    state.hub.bind_session(session_id, connection_id).await;
}

/// Dispatches one already-parsed envelope. Requests return the JSON-RPC
/// reply to push onto the SSE stream; notifications and client replies
/// to server-initiated requests return `None` (nothing to push back).
pub async fn handle_message(state: &Arc<AppState>, connection_id: Uuid, user_id: &str, message: JSONRPCMessage) -> Option<JSONRPCMessage> {
    match message {
        JSONRPCMessage::Request(request) => {
            maybe_bind_session(state, connection_id, &request.method, &request.params.clone().unwrap_or(Value::Null)).await;
            let params = request.params.unwrap_or(Value::Null);
            let outcome = match request.method.as_str() {
                "initialize" => handle_initialize(state, connection_id, params).await,
                "tools/list" => handle_tools_list(),
                "tools/call" => handle_tools_call(state, user_id, params).await,
                other => Err(DumpsrvError::InvalidArgument(format!("unknown method {other}"))),
            };
            Some(match outcome {
                Ok(result) => ok_response(request.id, result),
                Err(DumpsrvError::InvalidArgument(msg)) if msg.starts_with("unknown method") => {
                    error_response(request.id, error_codes::METHOD_NOT_FOUND, msg)
                }
                Err(e) => error_response(request.id, e.to_jsonrpc_code(), e.to_string()),
            })
        }
        JSONRPCMessage::Notification(_) => None,
        JSONRPCMessage::Response(response) => {
            if let Some(connection) = state.hub.get(connection_id).await {
                connection.complete(&response.id, response.result).await;
            }
            None
        }
        JSONRPCMessage::Error(error) => {
            if let Some(connection) = state.hub.get(connection_id).await {
                connection.complete(&error.id, Value::Null).await;
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use dumpsrv_mcp_types::tool::ClientCapabilities;
    use dumpsrv_mcp_types::SamplingCapability;
    use serde_json::json;

    use super::*;
    use crate::state::build_state;

    async fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = dumpsrv_core::Config::default();
        config.storage_dir = dir.path().to_path_buf();
        build_state(config).await.unwrap()
    }

    #[tokio::test]
    async fn initialize_records_sampling_capability() {
        let state = test_state().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let connection = state.hub.register(tx).await;

        let message = JSONRPCMessage::Request(dumpsrv_mcp_types::JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: "initialize".to_string(),
            params: Some(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "clientInfo": {"name": "test-client", "version": "0.1.0"},
                "capabilities": {"sampling": {"tools": {}}},
            })),
        });
        let reply = handle_message(&state, connection.connection_id, "u1", message).await.unwrap();
        assert!(matches!(reply, JSONRPCMessage::Response(_)));
        assert!(connection.supports_sampling().await);
    }

    #[tokio::test]
    async fn tools_list_returns_full_palette() {
        let state = test_state().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let connection = state.hub.register(tx).await;

        let message = JSONRPCMessage::Request(dumpsrv_mcp_types::JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(2),
            method: "tools/list".to_string(),
            params: None,
        });
        let reply = handle_message(&state, connection.connection_id, "u1", message).await.unwrap();
        match reply {
            JSONRPCMessage::Response(r) => {
                let result: ListToolsResult = serde_json::from_value(r.result).unwrap();
                assert!(!result.tools.is_empty());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let state = test_state().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let connection = state.hub.register(tx).await;

        let message = JSONRPCMessage::Request(dumpsrv_mcp_types::JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(3),
            method: "bogus/method".to_string(),
            params: None,
        });
        let reply = handle_message(&state, connection.connection_id, "u1", message).await.unwrap();
        match reply {
            JSONRPCMessage::Error(e) => assert_eq!(e.error.code, error_codes::METHOD_NOT_FOUND),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notification_produces_no_reply() {
        let state = test_state().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let connection = state.hub.register(tx).await;

        let message = JSONRPCMessage::Notification(dumpsrv_mcp_types::JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "notifications/cancelled".to_string(),
            params: None,
        });
        assert!(handle_message(&state, connection.connection_id, "u1", message).await.is_none());
    }

    #[tokio::test]
    async fn client_response_completes_pending_sampling_request() {
        let state = test_state().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let connection = state.hub.register(tx).await;
        connection
            .set_capabilities(ClientCapabilities {
                sampling: Some(SamplingCapability::default()),
            })
            .await;

        let connection_for_task = connection.clone();
        let handle = tokio::spawn(async move {
            use dumpsrv_core::ai::SamplingClient;
            connection_for_task
                .create_message(dumpsrv_mcp_types::CreateMessageParams {
                    messages: vec![],
                    system_prompt: None,
                    max_tokens: 16,
                    tools: None,
                })
                .await
        });
        let _event = rx.recv().await.expect("request event pushed");

        let response = JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(0),
            result: json!({
                "role": "assistant",
                "content": {"type": "text", "text": "hi"},
                "model": "test-model",
                "stopReason": "endTurn",
            }),
        });
        assert!(handle_message(&state, connection.connection_id, "u1", response).await.is_none());
        handle.await.unwrap().unwrap();
    }
}
