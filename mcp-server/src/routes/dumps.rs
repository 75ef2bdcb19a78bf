//! `/api/dumps/*` (§6): multipart upload plus the plain CRUD surface
//! over `dumpsrv_core::dumps::DumpStore` that sits next to the
//! JSON-RPC `dump` tool for clients that would rather not speak
//! JSON-RPC just to move bytes around.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use dumpsrv_protocol::Dump;
use dumpsrv_protocol::DumpsrvError;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/dumps/upload", post(upload))
        .route("/api/dumps/user/{userId}", get(list))
        .route("/api/dumps/{userId}/{dumpId}", get(get_one).delete(remove))
}

/// Expects two multipart fields: `file` (the `.dmp` bytes) and an
/// optional `description`. `userId` is read off the `file` part's own
/// form alongside it since this endpoint has no path segment for it —
/// callers send it as a third plain-text field.
async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Result<Json<Dump>, ApiError> {
    let mut user_id: Option<String> = None;
    let mut description: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "userId" => {
                user_id = Some(field.text().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?);
            }
            "description" => {
                description = Some(field.text().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?);
            }
            "file" => {
                let data = field.bytes().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?;
                bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let user_id = user_id.ok_or_else(|| DumpsrvError::InvalidArgument("missing 'userId' field".into()))?;
    let bytes = bytes.ok_or_else(|| DumpsrvError::InvalidArgument("missing 'file' field".into()))?;
    let dump = state.tools.dumps.upload(&user_id, &bytes, description).await?;
    Ok(Json(dump))
}

async fn list(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> Result<Json<Vec<Dump>>, ApiError> {
    Ok(Json(state.tools.dumps.list(&user_id).await?))
}

async fn get_one(State(state): State<Arc<AppState>>, Path((user_id, dump_id)): Path<(String, String)>) -> Result<Json<Dump>, ApiError> {
    Ok(Json((*state.tools.dumps.get(&user_id, &dump_id).await?).clone()))
}

async fn remove(State(state): State<Arc<AppState>>, Path((user_id, dump_id)): Path<(String, String)>) -> Result<StatusCode, ApiError> {
    state.tools.dumps.remove(&user_id, &dump_id).await?;
    Ok(StatusCode::NO_CONTENT)
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
    async fn list_then_get_then_remove_round_trip() {
        let state = test_state().await;
        let dump = state.tools.dumps.upload("u1", b"dump bytes", None).await.unwrap();

        let listed = list(State(state.clone()), Path("u1".to_string())).await.unwrap();
        assert_eq!(listed.0.len(), 1);

        let fetched = get_one(State(state.clone()), Path(("u1".to_string(), dump.dump_id.clone()))).await.unwrap();
        assert_eq!(fetched.0.dump_id, dump.dump_id);

        let status = remove(State(state.clone()), Path(("u1".to_string(), dump.dump_id.clone()))).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(get_one(State(state), Path(("u1".to_string(), dump.dump_id))).await.is_err());
    }
}
