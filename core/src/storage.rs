//! Atomic on-disk persistence helpers shared by the session manager,
//! report store, and watch store (§5 "Disk state files written with
//! atomic rename").
//!
//! The teacher's `RolloutRecorder` (`core/src/rollout.rs`) appends
//! JSONL through a dedicated writer task; this service instead persists
//! whole-document snapshots (sessions, reports, watch lists) keyed by
//! id, so the analogous safety property is atomic replace-on-write
//! rather than append-only growth.

use std::path::Path;
use std::path::PathBuf;

use dumpsrv_protocol::DumpsrvError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serializes `value` as pretty JSON to `path` by writing to a sibling
/// `.tmp` file and renaming over the target, so a concurrent reader (or
/// a crash mid-write) never observes a partial document.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DumpsrvError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DumpsrvError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn remove_if_exists(path: &Path) -> Result<(), DumpsrvError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp.file_name().and_then(|n| n.to_str()).unwrap_or("tmp").to_string();
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        value: u32,
    }

    #[tokio::test]
    async fn round_trips_through_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_json_atomic(&path, &Doc { value: 1 }).await.unwrap();
        let loaded: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(loaded, Some(Doc { value: 1 }));
        assert!(!tmp_sibling(&path).exists());
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { value: 2 }).await.unwrap();
        remove_if_exists(&path).await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }
}
