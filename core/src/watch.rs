//! Watch store (§4.J): persisted per-dump watch expressions plus the
//! evaluator that re-runs each one through the debugger and classifies
//! the raw text into a [`WatchValueKind`].
//!
//! Any mutation (`add`/`remove`/`clear`) must invalidate the dump's
//! cached report; that call is the dispatcher's responsibility in
//! `tools.rs`, kept at the call site rather than inside the store
//! itself so the store has no dependency on the report cache.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use dumpsrv_protocol::DumpsrvError;
use dumpsrv_protocol::Watch;
use dumpsrv_protocol::WatchResult;
use dumpsrv_protocol::WatchValueKind;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage;

/// `(userId, dumpId) -> Vec<Watch>`, backed by
/// `{storage}/watches/{userId}/{dumpId}.json`.
pub struct WatchStore {
    storage_dir: PathBuf,
    cache: RwLock<HashMap<(String, String), Vec<Watch>>>,
}

impl WatchStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path(&self, user_id: &str, dump_id: &str) -> PathBuf {
        self.storage_dir.join("watches").join(user_id).join(format!("{dump_id}.json"))
    }

    fn cache_key(user_id: &str, dump_id: &str) -> (String, String) {
        (user_id.to_string(), dump_id.to_string())
    }

    async fn load(&self, user_id: &str, dump_id: &str) -> Result<Vec<Watch>, DumpsrvError> {
        let key = Self::cache_key(user_id, dump_id);
        if let Some(watches) = self.cache.read().await.get(&key).cloned() {
            return Ok(watches);
        }
        let watches = storage::read_json::<Vec<Watch>>(&self.path(user_id, dump_id)).await?.unwrap_or_default();
        self.cache.write().await.insert(key, watches.clone());
        Ok(watches)
    }

    async fn save(&self, user_id: &str, dump_id: &str, watches: Vec<Watch>) -> Result<(), DumpsrvError> {
        storage::write_json_atomic(&self.path(user_id, dump_id), &watches).await?;
        self.cache.write().await.insert(Self::cache_key(user_id, dump_id), watches);
        Ok(())
    }

    pub async fn list(&self, user_id: &str, dump_id: &str) -> Result<Vec<Watch>, DumpsrvError> {
        self.load(user_id, dump_id).await
    }

    pub async fn has_any(&self, user_id: &str, dump_id: &str) -> Result<bool, DumpsrvError> {
        Ok(!self.load(user_id, dump_id).await?.is_empty())
    }

    pub async fn get(&self, user_id: &str, dump_id: &str, watch_id: Uuid) -> Result<Option<Watch>, DumpsrvError> {
        Ok(self.load(user_id, dump_id).await?.into_iter().find(|w| w.id == watch_id))
    }

    pub async fn add(&self, user_id: &str, dump_id: &str, expression: String, description: Option<String>) -> Result<Watch, DumpsrvError> {
        if expression.trim().is_empty() {
            return Err(DumpsrvError::InvalidArgument("watch expression must not be empty".into()));
        }
        let mut watches = self.load(user_id, dump_id).await?;
        let watch = Watch::new(dump_id, expression, description);
        watches.push(watch.clone());
        self.save(user_id, dump_id, watches).await?;
        Ok(watch)
    }

    pub async fn remove(&self, user_id: &str, dump_id: &str, watch_id: Uuid) -> Result<bool, DumpsrvError> {
        let mut watches = self.load(user_id, dump_id).await?;
        let before = watches.len();
        watches.retain(|w| w.id != watch_id);
        let removed = watches.len() != before;
        if removed {
            self.save(user_id, dump_id, watches).await?;
        }
        Ok(removed)
    }

    pub async fn clear(&self, user_id: &str, dump_id: &str) -> Result<(), DumpsrvError> {
        self.save(user_id, dump_id, Vec::new()).await
    }
}

/// debugger-rendered pointer values: "0x00007ff812345678" or bare 8-16 digit hex.
fn looks_like_address(s: &str) -> bool {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    (8..=16).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

fn looks_like_number(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    if s.is_empty() {
        return false;
    }
    let mut parts = s.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let frac = parts.next();
    !whole.is_empty() && whole.chars().all(|c| c.is_ascii_digit()) && frac.is_none_or(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

/// Classifies a raw `exec` result line with cheap syntactic checks in
/// priority order, never a real debugger-value parser.
pub fn classify_value(raw: &str) -> WatchValueKind {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return WatchValueKind::Error;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("error") || lower.contains("<error") || lower.contains("unable to") || lower.contains("failed") {
        return WatchValueKind::Error;
    }
    if looks_like_address(trimmed) {
        return WatchValueKind::Address;
    }
    if looks_like_number(trimmed) || matches!(lower.as_str(), "true" | "false" | "null") {
        return WatchValueKind::Primitive;
    }
    WatchValueKind::Object
}

/// Re-evaluates `watch` through `exec`, which should route to the owning
/// session's debugger (kept generic over the executor so tests can stub
/// it without standing up a full [`crate::debugger::DebuggerInstance`]).
pub async fn evaluate<F, Fut>(watch: &Watch, exec: F) -> WatchResult
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<String, DumpsrvError>>,
{
    match exec(watch.expression.clone()).await {
        Ok(raw) => WatchResult {
            watch_id: watch.id,
            expression: watch.expression.clone(),
            kind: classify_value(&raw),
            value: raw,
        },
        Err(e) => WatchResult {
            watch_id: watch.id,
            expression: watch.expression.clone(),
            kind: WatchValueKind::Error,
            value: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_addresses_numbers_and_objects() {
        assert_eq!(classify_value("0x00007ff812345678"), WatchValueKind::Address);
        assert_eq!(classify_value("42"), WatchValueKind::Primitive);
        assert_eq!(classify_value("true"), WatchValueKind::Primitive);
        assert_eq!(classify_value("System.String[] (len=3)"), WatchValueKind::Object);
        assert_eq!(classify_value("Error: failed to evaluate expression"), WatchValueKind::Error);
        assert_eq!(classify_value(""), WatchValueKind::Error);
    }

    #[tokio::test]
    async fn add_list_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatchStore::new(dir.path());
        let watch = store.add("u1", "d1", "*(int*)0x1234".into(), None).await.unwrap();
        assert_eq!(store.list("u1", "d1").await.unwrap().len(), 1);
        assert!(store.has_any("u1", "d1").await.unwrap());

        assert!(store.remove("u1", "d1", watch.id).await.unwrap());
        assert!(!store.has_any("u1", "d1").await.unwrap());
    }

    #[tokio::test]
    async fn add_rejects_blank_expression() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatchStore::new(dir.path());
        let err = store.add("u1", "d1", "   ".into(), None).await.unwrap_err();
        assert!(matches!(err, DumpsrvError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn evaluate_maps_exec_error_to_error_kind() {
        let watch = Watch::new("d1", "bogus", None);
        let result = evaluate(&watch, |_expr| async { Err(DumpsrvError::Timeout(std::time::Duration::from_secs(1))) }).await;
        assert_eq!(result.kind, WatchValueKind::Error);
    }
}
