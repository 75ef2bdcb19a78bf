//! Maps [`dumpsrv_protocol::error::DumpsrvError`] onto HTTP responses for
//! the REST surface. JSON-RPC errors (for the `/mcp/message` channel) are
//! built separately in `jsonrpc.rs` since they carry a request id and a
//! different error shape.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use dumpsrv_protocol::error::DumpsrvError;
use serde_json::json;

pub struct ApiError(pub DumpsrvError);

impl From<DumpsrvError> for ApiError {
    fn from(err: DumpsrvError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
