use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// One tool call the AI made during a sampling run and its outcome.
/// Digests (rather than raw args/results) keep the ledger small enough
/// to carry forward across iterations; `excerpt` is the human-readable
/// trace (first N chars of the result, capped by
/// `AI_EVIDENCE_EXCERPT_MAX_CHARS`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceEntry {
    pub iteration: u32,
    pub tool_name: String,
    pub args_digest: String,
    pub result_digest: String,
    pub excerpt: String,
}

impl EvidenceEntry {
    pub fn new(iteration: u32, tool_name: impl Into<String>, args: &serde_json::Value, result: &str, excerpt_max_chars: usize) -> Self {
        let args_digest = digest_value(args);
        let result_digest = digest_str(result);
        let excerpt: String = result.chars().take(excerpt_max_chars).collect();
        Self {
            iteration,
            tool_name: tool_name.into(),
            args_digest,
            result_digest,
            excerpt,
        }
    }
}

fn digest_value(v: &serde_json::Value) -> String {
    digest_str(&v.to_string())
}

fn digest_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Periodic structured self-summary the model emits during the AI loop.
/// Carried forward into subsequent prompts until superseded by a newer
/// checkpoint or reset by a snapshot-identity change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub hypothesis: String,
    pub open_questions: Vec<String>,
    pub confidence: f32,
}

/// Append-only evidence log scoped to `(sessionId, dumpId)`. Reset
/// whenever `dumpId` or `report.generatedAt` changes (§8 "evidence
/// reset" invariant) — see `EvidenceLedger::reset_if_stale`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidenceLedger {
    pub dump_id: String,
    pub report_generated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub entries: Vec<EvidenceEntry>,
    pub checkpoint: Option<Checkpoint>,
}

impl EvidenceLedger {
    pub fn new(dump_id: impl Into<String>) -> Self {
        Self {
            dump_id: dump_id.into(),
            report_generated_at: None,
            entries: Vec::new(),
            checkpoint: None,
        }
    }

    /// Returns `true` if the ledger was reset because the identity of
    /// the report it was accumulated against has changed.
    pub fn reset_if_stale(&mut self, dump_id: &str, report_generated_at: chrono::DateTime<chrono::Utc>) -> bool {
        let stale = self.dump_id != dump_id || self.report_generated_at != Some(report_generated_at);
        if stale {
            self.dump_id = dump_id.to_string();
            self.report_generated_at = Some(report_generated_at);
            self.entries.clear();
            self.checkpoint = None;
        }
        stale
    }

    pub fn push(&mut self, entry: EvidenceEntry) {
        self.entries.push(entry);
    }

    /// Total size of every recorded excerpt, used to bound the ledger
    /// against the AI loop's evidence budget (§4.I step 5: "ledger
    /// exceeds evidence budget" is one of the loop's termination
    /// conditions).
    pub fn total_excerpt_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.excerpt.len()).sum()
    }

    pub fn excerpt_text(&self, max_entries: usize) -> String {
        self.entries
            .iter()
            .rev()
            .take(max_entries)
            .rev()
            .map(|e| format!("[{}] {} -> {}", e.iteration, e.tool_name, e.excerpt))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn reset_on_dump_change() {
        let mut ledger = EvidenceLedger::new("d1");
        let t0 = Utc::now();
        ledger.reset_if_stale("d1", t0);
        ledger.push(EvidenceEntry::new(0, "exec", &serde_json::json!({"c": "lm"}), "ok", 100));
        assert_eq!(ledger.entries.len(), 1);

        let reset = ledger.reset_if_stale("d2", t0);
        assert!(reset);
        assert!(ledger.entries.is_empty());
    }

    #[test]
    fn reset_on_generated_at_change() {
        let mut ledger = EvidenceLedger::new("d1");
        let t0 = Utc::now();
        ledger.reset_if_stale("d1", t0);
        ledger.push(EvidenceEntry::new(0, "exec", &serde_json::json!({}), "x", 10));

        let t1 = t0 + chrono::Duration::seconds(1);
        let reset = ledger.reset_if_stale("d1", t1);
        assert!(reset);
        assert!(ledger.entries.is_empty());
    }

    #[test]
    fn no_reset_when_identity_unchanged() {
        let mut ledger = EvidenceLedger::new("d1");
        let t0 = Utc::now();
        ledger.reset_if_stale("d1", t0);
        ledger.push(EvidenceEntry::new(0, "exec", &serde_json::json!({}), "x", 10));
        let reset = ledger.reset_if_stale("d1", t0);
        assert!(!reset);
        assert_eq!(ledger.entries.len(), 1);
    }

    #[test]
    fn total_excerpt_bytes_sums_every_entry() {
        let mut ledger = EvidenceLedger::new("d1");
        ledger.push(EvidenceEntry::new(0, "exec", &serde_json::json!({}), "abc", 10));
        ledger.push(EvidenceEntry::new(1, "exec", &serde_json::json!({}), "defgh", 10));
        assert_eq!(ledger.total_excerpt_bytes(), 8);
    }
}
