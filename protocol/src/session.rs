use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state of a [`DebuggerInstance`] as tracked on the [`Session`].
///
/// The actual subprocess handle lives in `dumpsrv-core::debugger`; this is
/// the serializable projection persisted alongside the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebuggerState {
    Uninitialized,
    Initialized,
    DumpOpen,
    DumpClosed,
    Disposed,
}

/// A user's debugger session: owns at most one open dump at a time.
///
/// Persisted to disk on every dump-boundary change (§3 invariant) so a
/// restarted process can restore it via [`DebuggerState::Uninitialized`]
/// and a lazy reopen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub current_dump_id: Option<String>,
    pub debugger_state: DebuggerState,
    pub has_managed_reader: bool,
    /// Extra symbol search directories the user configured for this
    /// session, on top of the per-dump policy layers.
    pub extra_symbol_paths: Vec<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: now,
            last_activity_at: now,
            current_dump_id: None,
            debugger_state: DebuggerState::Uninitialized,
            has_managed_reader: false,
            extra_symbol_paths: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn is_idle(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity_at) > timeout
    }

    pub fn owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn header(&self) -> SessionHeader {
        SessionHeader {
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            current_dump_id: self.current_dump_id.clone(),
        }
    }
}

/// Lightweight summary returned by `session(action="list")`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionHeader {
    pub session_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub current_dump_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_no_open_dump() {
        let s = Session::new("u1");
        assert!(s.current_dump_id.is_none());
        assert_eq!(s.debugger_state, DebuggerState::Uninitialized);
    }

    #[test]
    fn ownership_check() {
        let s = Session::new("u1");
        assert!(s.owned_by("u1"));
        assert!(!s.owned_by("u2"));
    }

    #[test]
    fn idle_detection() {
        let mut s = Session::new("u1");
        s.last_activity_at = Utc::now() - chrono::Duration::minutes(45);
        assert!(s.is_idle(Utc::now(), chrono::Duration::minutes(30)));
        s.touch();
        assert!(!s.is_idle(Utc::now(), chrono::Duration::minutes(30)));
    }
}
