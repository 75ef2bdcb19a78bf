use std::io;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, DumpsrvError>;

/// The error taxonomy every fallible operation in the service returns.
///
/// Boundary crates (`dumpsrv-server`, `dumpsrv-core::tools`) map each
/// variant onto an HTTP status and a JSON-RPC error code via
/// [`DumpsrvError::to_http_status`] and [`DumpsrvError::to_jsonrpc_code`];
/// nothing upstream of those boundaries should match on string messages.
#[derive(Error, Debug)]
pub enum DumpsrvError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    Preconditioned(String),

    #[error("managed runtime data unavailable for this dump")]
    RequiresManagedRuntime,

    #[error("debugger unavailable: {0}")]
    DebuggerUnavailable(String),

    #[error("transport lost")]
    TransportLost,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DumpsrvError {
    pub fn not_found_session(session_id: Uuid) -> Self {
        Self::NotFound(format!("session {session_id}"))
    }

    pub fn not_found_dump(dump_id: &str) -> Self {
        Self::NotFound(format!("dump {dump_id}"))
    }

    /// HTTP status code used by the server's error-response middleware.
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Preconditioned(_) | Self::RequiresManagedRuntime => 412,
            Self::QuotaExceeded(_) => 429,
            Self::Timeout(_) => 408,
            Self::Cancelled => 499,
            Self::DebuggerUnavailable(_) | Self::TransportLost => 503,
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }

    /// JSON-RPC error code used when wrapping a tool result as
    /// `CallToolResultContent` with `isError=true`, or when a malformed
    /// request never reaches the tool dispatcher.
    ///
    /// The standard JSON-RPC range (`-32700..=-32603`) is reserved for
    /// parse/protocol errors (see `dumpsrv_mcp_types::JSONRPC_METHOD_NOT_FOUND`
    /// and friends); everything below is a service-level code in the
    /// `-3200x` block.
    pub fn to_jsonrpc_code(&self) -> i64 {
        match self {
            Self::InvalidArgument(_) => -32001,
            Self::Unauthorized => -32002,
            Self::NotFound(_) => -32003,
            Self::QuotaExceeded(_) => -32004,
            Self::Conflict(_) => -32005,
            Self::Preconditioned(_) | Self::RequiresManagedRuntime => -32006,
            Self::DebuggerUnavailable(_) => -32007,
            Self::TransportLost => -32008,
            Self::Timeout(_) => -32009,
            Self::Cancelled => -32010,
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => -32000,
        }
    }

    /// Whether a client may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::TransportLost | Self::DebuggerUnavailable(_)
        )
    }
}
