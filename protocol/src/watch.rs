use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// How the watch evaluator classified the `exec` output for a watch
/// expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchValueKind {
    Address,
    Primitive,
    Object,
    Error,
}

/// A persisted, per-dump expression evaluated on demand by re-running
/// `exec` against the owning session's debugger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Watch {
    pub id: Uuid,
    pub dump_id: String,
    pub expression: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub value_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Watch {
    pub fn new(dump_id: impl Into<String>, expression: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dump_id: dump_id.into(),
            expression: expression.into(),
            description,
            value_type: None,
            created_at: Utc::now(),
        }
    }
}

/// Result of evaluating a single [`Watch`] against the live debugger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchResult {
    pub watch_id: Uuid,
    pub expression: String,
    pub kind: WatchValueKind,
    pub value: String,
}
