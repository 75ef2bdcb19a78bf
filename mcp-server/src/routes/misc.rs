//! `/health`, `/info`, `/api/server/capabilities` (§6): liveness and
//! platform advertisement. No `AppState` fields are mutated here; these
//! handlers only read `Config` and process-wide constants.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use dumpsrv_mcp_types::MCP_PROTOCOL_VERSION;
use serde_json::Value;
use serde_json::json;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/api/server/capabilities", get(capabilities))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn info() -> Json<Value> {
    Json(json!({
        "name": "dumpsrv",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": MCP_PROTOCOL_VERSION,
    }))
}

/// Platform/arch/runtime advertisement (§6): which native debugger a
/// client should expect this process to drive, not a live capability
/// probe — the debugger subprocess is only spawned on first `dump.open`.
async fn capabilities(State(state): State<Arc<AppState>>) -> Json<Value> {
    let debugger = if cfg!(target_os = "windows") { "dbgeng" } else { "lldb" };
    Json(json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "debugger": debugger,
        "sessionQuotaPerUser": state.config.session_quota_per_user,
        "datadogTraceSymbolsEnabled": state.config.datadog_trace_symbols_enabled,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::build_state;

    async fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = dumpsrv_core::Config::default();
        config.storage_dir = dir.path().to_path_buf();
        build_state(config).await.unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn info_carries_protocol_version() {
        let Json(body) = info().await;
        assert_eq!(body["protocolVersion"], MCP_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn capabilities_reports_session_quota() {
        let state = test_state().await;
        let quota = state.config.session_quota_per_user;
        let Json(body) = capabilities(State(state)).await;
        assert_eq!(body["sessionQuotaPerUser"], quota);
    }
}
