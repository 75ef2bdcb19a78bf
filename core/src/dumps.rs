//! Dump store (§3 `Dump`, §6 persisted layout): per-user uploaded dump
//! files plus the metadata record that accumulates lazily filled fields
//! (`isAlpineDump`, `runtimeVersion`, ...) once the dump is first opened.
//!
//! Mirrors [`crate::session::SessionManager`]'s split between an
//! in-memory map and a disk-backed record, using the same
//! [`crate::storage::write_json_atomic`] helper the session manager and
//! report store use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dumpsrv_protocol::Dump;
use dumpsrv_protocol::DumpMetadata;
use dumpsrv_protocol::DumpsrvError;
use sha2::Digest;
use sha2::Sha256;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage;

/// `(userId, dumpId) -> Dump`, backed by
/// `{storage}/dumps/{userId}/{dumpId}.dmp` + `.json` (§6).
pub struct DumpStore {
    storage_dir: PathBuf,
    cache: RwLock<HashMap<(String, String), Arc<Dump>>>,
}

impl DumpStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.storage_dir.join("dumps").join(user_id)
    }

    fn dump_path(&self, user_id: &str, dump_id: &str) -> PathBuf {
        self.user_dir(user_id).join(format!("{dump_id}.dmp"))
    }

    fn metadata_path(&self, user_id: &str, dump_id: &str) -> PathBuf {
        self.user_dir(user_id).join(format!("{dump_id}.json"))
    }

    fn cache_key(user_id: &str, dump_id: &str) -> (String, String) {
        (user_id.to_string(), dump_id.to_string())
    }

    /// Persists `bytes` as a new dump owned by `user_id`, computing its
    /// sha256 and writing the metadata sidecar with the same filename
    /// stem (§3 invariant).
    pub async fn upload(&self, user_id: &str, bytes: &[u8], description: Option<String>) -> Result<Dump, DumpsrvError> {
        let dump_id = Uuid::new_v4().to_string();
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let sha256 = format!("{:x}", hasher.finalize());

        let dump_path = self.dump_path(user_id, &dump_id);
        if let Some(parent) = dump_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dump_path, bytes).await?;

        let mut dump = Dump::new(user_id, &dump_id, dump_path.display().to_string(), sha256);
        dump.description = description;
        storage::write_json_atomic(&self.metadata_path(user_id, &dump_id), &dump).await?;

        self.cache.write().await.insert(Self::cache_key(user_id, &dump_id), Arc::new(dump.clone()));
        Ok(dump)
    }

    pub async fn get(&self, user_id: &str, dump_id: &str) -> Result<Arc<Dump>, DumpsrvError> {
        let key = Self::cache_key(user_id, dump_id);
        if let Some(dump) = self.cache.read().await.get(&key).cloned() {
            return Ok(dump);
        }
        let Some(dump) = storage::read_json::<Dump>(&self.metadata_path(user_id, dump_id)).await? else {
            return Err(DumpsrvError::not_found_dump(dump_id));
        };
        let dump = Arc::new(dump);
        self.cache.write().await.insert(key, dump.clone());
        Ok(dump)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Dump>, DumpsrvError> {
        let dir = self.user_dir(user_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(dump) = storage::read_json::<Dump>(&path).await? {
                    out.push(dump);
                }
            }
        }
        out.sort_by(|a, b| a.dump_id.cmp(&b.dump_id));
        Ok(out)
    }

    pub async fn remove(&self, user_id: &str, dump_id: &str) -> Result<(), DumpsrvError> {
        self.cache.write().await.remove(&Self::cache_key(user_id, dump_id));
        storage::remove_if_exists(&self.dump_path(user_id, dump_id)).await?;
        storage::remove_if_exists(&self.metadata_path(user_id, dump_id)).await
    }

    /// Fills in the lazy [`DumpMetadata`] fields discovered on first
    /// `dump.open` (.NET detection, architecture, ...) and persists the
    /// updated record.
    pub async fn update_metadata(&self, user_id: &str, dump_id: &str, mutate: impl FnOnce(&mut DumpMetadata)) -> Result<Dump, DumpsrvError> {
        let mut dump = (*self.get(user_id, dump_id).await?).clone();
        mutate(&mut dump.metadata);
        storage::write_json_atomic(&self.metadata_path(user_id, dump_id), &dump).await?;
        self.cache.write().await.insert(Self::cache_key(user_id, dump_id), Arc::new(dump.clone()));
        Ok(dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DumpStore::new(dir.path());
        let dump = store.upload("u1", b"fake dump bytes", Some("test".into())).await.unwrap();
        let fetched = store.get("u1", &dump.dump_id).await.unwrap();
        assert_eq!(fetched.dump_id, dump.dump_id);
        assert_eq!(fetched.sha256, dump.sha256);
    }

    #[tokio::test]
    async fn list_returns_all_uploaded_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let store = DumpStore::new(dir.path());
        store.upload("u1", b"a", None).await.unwrap();
        store.upload("u1", b"b", None).await.unwrap();
        let listed = store.list("u1").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn remove_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DumpStore::new(dir.path());
        let dump = store.upload("u1", b"a", None).await.unwrap();
        store.remove("u1", &dump.dump_id).await.unwrap();
        let err = store.get("u1", &dump.dump_id).await.unwrap_err();
        assert!(matches!(err, DumpsrvError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_metadata_persists_lazy_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = DumpStore::new(dir.path());
        let dump = store.upload("u1", b"a", None).await.unwrap();
        store
            .update_metadata("u1", &dump.dump_id, |m| {
                m.is_dotnet = Some(true);
                m.runtime_version = Some("8.0.0".into());
            })
            .await
            .unwrap();
        let fetched = store.get("u1", &dump.dump_id).await.unwrap();
        assert_eq!(fetched.metadata.is_dotnet, Some(true));
    }
}
