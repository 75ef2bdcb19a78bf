//! `/api/symbols/*` (§4.C, §6): upload individual symbol files or a
//! zipped batch into a dump's `extracted` layer, and list what has
//! accumulated there.

use std::io::Cursor;
use std::io::Read;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use dumpsrv_protocol::DumpsrvError;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/symbols/upload", axum::routing::post(upload))
        .route("/api/symbols/upload-zip", axum::routing::post(upload_zip))
        .route("/api/symbols/dump/{dumpId}", axum::routing::get(list))
}

struct UploadFields {
    user_id: String,
    dump_id: String,
    file_name: Option<String>,
    bytes: Vec<u8>,
}

async fn read_upload_fields(mut multipart: Multipart) -> Result<UploadFields, DumpsrvError> {
    let mut user_id = None;
    let mut dump_id = None;
    let mut file_name = None;
    let mut bytes = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "userId" => user_id = Some(field.text().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?),
            "dumpId" => dump_id = Some(field.text().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?),
            "file" => {
                file_name = field.file_name().map(str::to_string);
                bytes = Some(field.bytes().await.map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    Ok(UploadFields {
        user_id: user_id.ok_or_else(|| DumpsrvError::InvalidArgument("missing 'userId' field".into()))?,
        dump_id: dump_id.ok_or_else(|| DumpsrvError::InvalidArgument("missing 'dumpId' field".into()))?,
        file_name,
        bytes: bytes.ok_or_else(|| DumpsrvError::InvalidArgument("missing 'file' field".into()))?,
    })
}

async fn upload(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Json<serde_json::Value>, ApiError> {
    let fields = read_upload_fields(multipart).await?;
    let file_name = fields.file_name.ok_or_else(|| DumpsrvError::InvalidArgument("missing file name on 'file' field".into()))?;
    state.tools.symbols.store_extracted_file(&fields.user_id, &fields.dump_id, &file_name, &fields.bytes).await?;
    Ok(Json(serde_json::json!({ "stored": [file_name] })))
}

/// Extracts every entry of a zip archive into the dump's `extracted`
/// layer. `zip::ZipArchive` is synchronous, so the parse runs on a
/// blocking thread rather than tying up the async runtime.
async fn upload_zip(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Json<serde_json::Value>, ApiError> {
    let UploadFields { user_id, dump_id, bytes, .. } = read_upload_fields(multipart).await?;
    let extracted = tokio::task::spawn_blocking(move || extract_zip_entries(&bytes))
        .await
        .map_err(|e| DumpsrvError::Internal(e.to_string()))??;

    for (name, data) in &extracted {
        state.tools.symbols.store_extracted_file(&user_id, &dump_id, name, data).await?;
    }
    Ok(Json(serde_json::json!({ "stored": extracted.into_iter().map(|(name, _)| name).collect::<Vec<_>>() })))
}

fn extract_zip_entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, DumpsrvError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DumpsrvError::InvalidArgument(format!("invalid zip archive: {e}")))?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| DumpsrvError::InvalidArgument(e.to_string()))?;
        out.push((name, data));
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "userId")]
    user_id: String,
}

async fn list(State(state): State<Arc<AppState>>, Path(dump_id): Path<String>, Query(query): Query<ListQuery>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.tools.symbols.list_extracted(&query.user_id, &dump_id).await?))
}
