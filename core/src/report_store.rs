//! Report store (§4.E): canonical JSON report cache keyed
//! `(userId, dumpId, optionsDigest)` with superset matching and disk
//! overflow for AI-enriched reports.

use std::collections::HashMap;
use std::path::PathBuf;

use dumpsrv_protocol::DumpsrvError;
use dumpsrv_protocol::ReportOptions;
use dumpsrv_protocol::ReportSnapshot;
use tokio::sync::RwLock;

use crate::storage;

#[derive(Clone)]
struct CacheKey {
    user_id: String,
    dump_id: String,
}

/// In-memory report cache with disk overflow for AI-enriched reports.
/// `get` hits only when the cached entry's feature set is a superset of
/// the request (`ReportOptions::satisfies`); a non-superset request
/// (including a different `llmKey`) falls through to a fresh analyzer
/// run by the caller.
pub struct ReportStore {
    storage_dir: PathBuf,
    cache: RwLock<HashMap<(String, String), ReportSnapshot>>,
}

impl ReportStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(user_id: &str, dump_id: &str) -> (String, String) {
        (user_id.to_string(), dump_id.to_string())
    }

    fn ai_report_path(&self, user_id: &str, dump_id: &str, llm_key: &str) -> PathBuf {
        self.storage_dir.join(user_id).join(dump_id).join(format!("ai_report_{llm_key}.json"))
    }

    /// Stores `snapshot`, keeping it in memory and, when it carries AI
    /// analysis, additionally writing it to
    /// `{storage}/{userId}/{dumpId}/ai_report_{llmKey}.json` (§4.E).
    pub async fn put(&self, snapshot: ReportSnapshot) -> Result<(), DumpsrvError> {
        if let Some(llm_key) = snapshot.metadata.options.llm_key.clone() {
            let path = self.ai_report_path(&snapshot.metadata.user_id, &snapshot.metadata.dump_id, &llm_key);
            storage::write_json_atomic(&path, &snapshot).await?;
        }
        let key = Self::cache_key(&snapshot.metadata.user_id, &snapshot.metadata.dump_id);
        self.cache.write().await.insert(key, snapshot);
        Ok(())
    }

    /// Returns the cached snapshot for `(user_id, dump_id)` only if it
    /// satisfies `requested` (§4.E superset rule). A cache entry that
    /// predates the request's feature set is treated as a miss so the
    /// caller regenerates it.
    pub async fn get(&self, user_id: &str, dump_id: &str, requested: &ReportOptions) -> Option<ReportSnapshot> {
        let key = Self::cache_key(user_id, dump_id);
        let cache = self.cache.read().await;
        cache.get(&key).filter(|snapshot| snapshot.metadata.options.satisfies(requested)).cloned()
    }

    /// Drops the cached entry for `(user_id, dump_id)`, e.g. on watch
    /// mutation (`invalidate_on_watch_change`, §4.E/§4.J).
    pub async fn invalidate(&self, user_id: &str, dump_id: &str) {
        self.cache.write().await.remove(&Self::cache_key(user_id, dump_id));
    }
}
