use serde::Deserialize;
use serde::Serialize;
use serde::de::Error as DeError;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard and service-level JSON-RPC error codes.
///
/// The `-32700..=-32603` range is reserved by the spec for
/// parse/protocol errors; `METHOD_NOT_FOUND` is used verbatim for the
/// "client hasn't declared `sampling.tools`" boundary case (§8). Service
/// errors returned by `dumpsrv_protocol::DumpsrvError::to_jsonrpc_code`
/// live in the adjoining `-3200x` block.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A JSON-RPC request id. Server-chosen monotonic integers for
/// requests the server initiates (sampling callbacks); client-chosen
/// for client-initiated requests, which may be strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Integer(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

/// One JSON-RPC envelope as it appears on the wire: either in a POST
/// body or as the `data:` payload of one SSE event (§3 `JsonRpcEnvelope`).
///
/// `serde(untagged)` tries each variant in order; [`JSONRPCMessage`]
/// additionally provides a manual [`TryFrom<Value>`] that applies the
/// spec's exact discriminant ("Request if method+id; notification if
/// method only; response if id+(result|error)") instead of relying on
/// untagged's first-match-wins ambiguity, which is unsafe across this
/// many overlapping shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

impl JSONRPCMessage {
    /// Parse a raw envelope applying the spec's discriminant explicitly,
    /// rather than relying on `serde(untagged)` match order. Returns a
    /// descriptive error for malformed envelopes (used to decide whether
    /// to surface `error_codes::PARSE_ERROR`/`INVALID_REQUEST`).
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| DeError::custom("jsonrpc envelope must be a JSON object"))?;

        let has_method = obj.contains_key("method");
        let has_id = obj.contains_key("id");
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");

        if has_method && has_id {
            return Ok(Self::Request(serde_json::from_value(value)?));
        }
        if has_method {
            return Ok(Self::Notification(serde_json::from_value(value)?));
        }
        if has_id && has_error {
            return Ok(Self::Error(serde_json::from_value(value)?));
        }
        if has_id && has_result {
            return Ok(Self::Response(serde_json::from_value(value)?));
        }
        Err(DeError::custom(
            "jsonrpc envelope is neither a request, a notification, nor a response",
        ))
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
            Self::Response(r) => Some(&r.id),
            Self::Error(e) => Some(&e.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_method_and_id() {
        let v = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        let msg = JSONRPCMessage::from_value(v).unwrap();
        assert!(matches!(msg, JSONRPCMessage::Request(_)));
    }

    #[test]
    fn notification_has_no_id() {
        let v = serde_json::json!({"jsonrpc": "2.0", "method": "notifications/cancelled"});
        let msg = JSONRPCMessage::from_value(v).unwrap();
        assert!(matches!(msg, JSONRPCMessage::Notification(_)));
    }

    #[test]
    fn response_has_id_and_result() {
        let v = serde_json::json!({"jsonrpc": "2.0", "id": 7, "result": {}});
        let msg = JSONRPCMessage::from_value(v).unwrap();
        match msg {
            JSONRPCMessage::Response(r) => assert_eq!(r.id, RequestId::Integer(7)),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn malformed_envelope_rejected() {
        let v = serde_json::json!({"jsonrpc": "2.0"});
        assert!(JSONRPCMessage::from_value(v).is_err());
    }
}
