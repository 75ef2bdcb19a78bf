//! `X-API-Key` boundary check (§6 "Auth: optional `X-API-Key` header,
//! checked against `Config.api_keys`"). Applied as a router-wide
//! middleware rather than per-handler so a newly added route can't
//! forget it; `/health` is exempt so liveness probes never need a key.

use std::sync::Arc;

use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use dumpsrv_protocol::DumpsrvError;

use crate::error::ApiError;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

fn is_exempt(path: &str) -> bool {
    path == "/health"
}

/// Empty `Config.api_keys` disables auth entirely (local/dev use,
/// per the field's own doc comment in `dumpsrv-core::config`).
fn check(state: &AppState, headers: &HeaderMap) -> Result<(), DumpsrvError> {
    if state.config.api_keys.is_empty() {
        return Ok(());
    }
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if state.config.api_keys.iter().any(|k| k == presented) {
        Ok(())
    } else {
        Err(DumpsrvError::Unauthorized)
    }
}

pub async fn require_api_key(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Result<Response, ApiError> {
    if is_exempt(request.uri().path()) {
        return Ok(next.run(request).await);
    }
    check(&state, request.headers())?;
    Ok(next.run(request).await)
}

/// Identifies the caller for `tools/call` dispatch (`dumpsrv_core::tools::dispatch`'s
/// `user_id` comes from this layer, never from the call arguments). The
/// presented API key doubles as the user id in this single-tenant-per-key
/// model; `X-User-Id` is an escape hatch for local/dev use when auth is
/// disabled and no key is presented.
pub fn resolve_user_id(headers: &HeaderMap) -> String {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return key.to_string();
        }
    }
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::state::build_state;

    async fn state_with_keys(keys: Vec<String>) -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = dumpsrv_core::Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.api_keys = keys;
        build_state(config).await.unwrap()
    }

    #[tokio::test]
    async fn empty_api_keys_disables_auth() {
        let state = state_with_keys(vec![]).await;
        assert!(check(&state, &HeaderMap::new()).is_ok());
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized_when_keys_configured() {
        let state = state_with_keys(vec!["secret".to_string()]).await;
        let err = check(&state, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, DumpsrvError::Unauthorized));
    }

    #[tokio::test]
    async fn matching_header_is_authorized() {
        let state = state_with_keys(vec!["secret".to_string()]).await;
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(check(&state, &headers).is_ok());
    }

    #[test]
    fn resolve_user_id_prefers_api_key_over_explicit_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("key-123"));
        headers.insert("x-user-id", HeaderValue::from_static("ignored"));
        assert_eq!(resolve_user_id(&headers), "key-123");
    }

    #[test]
    fn resolve_user_id_falls_back_to_anonymous() {
        assert_eq!(resolve_user_id(&HeaderMap::new()), "anonymous");
    }

    #[test]
    fn health_path_is_exempt() {
        assert!(is_exempt("/health"));
        assert!(!is_exempt("/api/dumps/upload"));
    }
}
