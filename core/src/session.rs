//! Session manager (§4.D): keyed session map, persistence, quotas,
//! idle eviction, restore-from-disk.
//!
//! A `HashMap<Uuid, Arc<Mutex<SessionEntry>>>` registry with
//! `create`/`acquire` entry points, plus disk persistence and
//! per-session ownership checks since sessions here are multi-tenant
//! and outlive a single process (unlike an in-memory-only registry).

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dumpsrv_protocol::DumpsrvError;
use dumpsrv_protocol::Session;
use dumpsrv_protocol::SessionHeader;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::debugger::DebuggerInstance;
use crate::managed_reader::ManagedReader;
use crate::storage;

/// Everything one session owns: its serializable header, the debugger
/// and managed reader resources (populated lazily on first `dump.open`),
/// and the cancellation token `close` trips for in-flight calls (§5).
pub struct SessionEntry {
    pub session: Session,
    pub debugger: Option<DebuggerInstance>,
    pub managed_reader: Option<ManagedReader>,
    pub cancellation: CancellationToken,
}

impl SessionEntry {
    fn fresh(session: Session) -> Self {
        Self {
            session,
            debugger: None,
            managed_reader: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// `(userId, sessionId) -> Session`, plus the disk-backed restore path.
/// In-memory map is authoritative while a session is loaded; the disk
/// record exists so a restarted process can reconstruct a
/// [`Session`] header (with `debugger_state` reset to `Uninitialized`
/// — the dump is not eagerly reopened, §4.D).
pub struct SessionManager {
    entries: RwLock<HashMap<Uuid, Arc<Mutex<SessionEntry>>>>,
    storage_dir: PathBuf,
    quota_per_user: usize,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(storage_dir: impl Into<PathBuf>, quota_per_user: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            storage_dir: storage_dir.into(),
            quota_per_user,
            idle_timeout,
        }
    }

    fn session_path(&self, user_id: &str, session_id: Uuid) -> PathBuf {
        self.storage_dir.join("sessions").join(user_id).join(format!("{session_id}.json"))
    }

    /// Creates a new session for `user_id`, rejecting with
    /// `QuotaExceeded` once the user's active-session count reaches the
    /// configured limit.
    pub async fn create(&self, user_id: &str) -> Result<Uuid, DumpsrvError> {
        let active = self.count_active_for_user(user_id).await;
        if active >= self.quota_per_user {
            return Err(DumpsrvError::QuotaExceeded(format!("user {user_id} already has {active} active sessions")));
        }

        let session = Session::new(user_id);
        let session_id = session.session_id;
        storage::write_json_atomic(&self.session_path(user_id, session_id), &session).await?;

        let mut entries = self.entries.write().await;
        entries.insert(session_id, Arc::new(Mutex::new(SessionEntry::fresh(session))));
        Ok(session_id)
    }

    async fn count_active_for_user(&self, user_id: &str) -> usize {
        let entries = self.entries.read().await;
        let mut count = 0;
        for entry in entries.values() {
            if entry.lock().await.session.owned_by(user_id) {
                count += 1;
            }
        }
        count
    }

    /// Resolves a session handle, restoring it from disk on a cache
    /// miss. Returns `Unauthorized` if the session exists but is owned
    /// by a different user, `NotFound` otherwise.
    pub async fn acquire(&self, session_id: Uuid, user_id: &str) -> Result<Arc<Mutex<SessionEntry>>, DumpsrvError> {
        if let Some(entry) = self.entries.read().await.get(&session_id).cloned() {
            if !entry.lock().await.session.owned_by(user_id) {
                return Err(DumpsrvError::Unauthorized);
            }
            entry.lock().await.session.touch();
            return Ok(entry);
        }

        let restored = self.restore_from_disk(session_id, user_id).await?;
        let mut entries = self.entries.write().await;
        let entry = entries.entry(session_id).or_insert_with(|| Arc::new(Mutex::new(SessionEntry::fresh(restored)))).clone();
        Ok(entry)
    }

    async fn restore_from_disk(&self, session_id: Uuid, user_id: &str) -> Result<Session, DumpsrvError> {
        let path = self.session_path(user_id, session_id);
        match storage::read_json::<Session>(&path).await? {
            Some(mut session) if session.owned_by(user_id) => {
                session.debugger_state = dumpsrv_protocol::DebuggerState::Uninitialized;
                Ok(session)
            }
            Some(_) => Err(DumpsrvError::Unauthorized),
            None => Err(DumpsrvError::not_found_session(session_id)),
        }
    }

    /// Idempotent snapshot of the current in-memory session state to
    /// disk (atomic rename, §5).
    pub async fn persist(&self, session_id: Uuid) -> Result<(), DumpsrvError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&session_id).cloned()
        };
        let Some(entry) = entry else {
            return Err(DumpsrvError::not_found_session(session_id));
        };
        let guard = entry.lock().await;
        let path = self.session_path(&guard.session.user_id, session_id);
        storage::write_json_atomic(&path, &guard.session).await
    }

    /// Closes a session: trips its cancellation token so in-flight
    /// calls fail `Cancelled`, disposes the debugger/managed reader,
    /// removes it from the in-memory map and its persisted record.
    pub async fn close(&self, session_id: Uuid, user_id: &str) -> Result<(), DumpsrvError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&session_id).cloned()
        };
        let Some(entry) = entry else {
            return Err(DumpsrvError::not_found_session(session_id));
        };

        {
            let mut guard = entry.lock().await;
            if !guard.session.owned_by(user_id) {
                return Err(DumpsrvError::Unauthorized);
            }
            guard.cancellation.cancel();
            if let Some(debugger) = guard.debugger.as_mut() {
                debugger.dispose().await;
            }
        }

        self.entries.write().await.remove(&session_id);
        storage::remove_if_exists(&self.session_path(user_id, session_id)).await
    }

    pub async fn list(&self, user_id: &str) -> Vec<SessionHeader> {
        let entries = self.entries.read().await;
        let mut headers = Vec::new();
        for entry in entries.values() {
            let guard = entry.lock().await;
            if guard.session.owned_by(user_id) {
                headers.push(guard.session.header());
            }
        }
        headers
    }

    /// Background sweep: closes every session idle past the configured
    /// timeout the same way an explicit `close` would. Returns the
    /// closed session ids for logging.
    pub async fn sweep_idle(&self) -> Vec<Uuid> {
        let now = chrono::Utc::now();
        let idle_timeout = chrono::Duration::from_std(self.idle_timeout).unwrap_or(chrono::Duration::zero());

        let stale: Vec<(Uuid, String)> = {
            let entries = self.entries.read().await;
            let mut stale = Vec::new();
            for (id, entry) in entries.iter() {
                let guard = entry.lock().await;
                if guard.session.is_idle(now, idle_timeout) {
                    stale.push((*id, guard.session.user_id.clone()));
                }
            }
            stale
        };

        let mut closed = Vec::new();
        for (session_id, user_id) in stale {
            if self.close(session_id, &user_id).await.is_ok() {
                closed.push(session_id);
            }
        }
        closed
    }

    #[cfg(test)]
    pub(crate) async fn active_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Standard storage-relative path for a user's session directory,
/// exposed for callers assembling the §6 layout outside this module.
pub fn sessions_dir(storage_dir: &Path, user_id: &str) -> PathBuf {
    storage_dir.join("sessions").join(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_respects_quota() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path(), 2, Duration::from_secs(1800));
        manager.create("u1").await.unwrap();
        manager.create("u1").await.unwrap();
        let err = manager.create("u1").await.unwrap_err();
        assert!(matches!(err, DumpsrvError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn acquire_rejects_wrong_owner() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path(), 5, Duration::from_secs(1800));
        let id = manager.create("u1").await.unwrap();
        let err = manager.acquire(id, "u2").await.unwrap_err();
        assert!(matches!(err, DumpsrvError::Unauthorized));
    }

    #[tokio::test]
    async fn close_removes_session_and_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path(), 5, Duration::from_secs(1800));
        let id = manager.create("u1").await.unwrap();
        manager.close(id, "u1").await.unwrap();
        assert_eq!(manager.active_count().await, 0);
        let err = manager.acquire(id, "u1").await.unwrap_err();
        assert!(matches!(err, DumpsrvError::NotFound(_)));
    }

    #[tokio::test]
    async fn restore_from_disk_resets_debugger_state_to_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path(), 5, Duration::from_secs(1800));
        let id = manager.create("u1").await.unwrap();

        // Simulate a process restart: drop the in-memory entry but keep
        // the persisted file, then acquire again.
        manager.entries.write().await.remove(&id);
        let entry = manager.acquire(id, "u1").await.unwrap();
        let guard = entry.lock().await;
        assert_eq!(guard.session.debugger_state, dumpsrv_protocol::DebuggerState::Uninitialized);
    }

    #[tokio::test]
    async fn sweep_idle_closes_only_timed_out_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path(), 5, Duration::from_secs(1800));
        let id = manager.create("u1").await.unwrap();
        {
            let entries = manager.entries.read().await;
            let entry = entries.get(&id).unwrap();
            entry.lock().await.session.last_activity_at = chrono::Utc::now() - chrono::Duration::hours(2);
        }
        let closed = manager.sweep_idle().await;
        assert_eq!(closed, vec![id]);
        assert_eq!(manager.active_count().await, 0);
    }
}
