use chrono::DateTime;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Discriminant for the `analyze(kind=...)` tool and the analyzer
/// registry (`dumpsrv-core::analyzers`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Crash,
    Ai,
    Performance,
    Cpu,
    Allocations,
    Gc,
    Contention,
    Security,
}

/// The fields a single analyzer contributes. Fragments are merged into
/// a fresh [`ReportSnapshot`] by functional composition — never by
/// mutating a live document (§9 redesign flag).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisFragment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contention: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watches: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

impl AnalysisFragment {
    /// Merge `other` on top of `self`. Fields present in `other`
    /// overwrite the same field in `self`; everything else is kept.
    /// Used to compose the crash/performance/... fragments and, later,
    /// the AI pass's rewritten summary/threads fields.
    pub fn merged_with(mut self, other: AnalysisFragment) -> Self {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(crash);
        take!(threads);
        take!(performance);
        take!(gc);
        take!(contention);
        take!(security);
        take!(watches);
        take!(ai_analysis);
        take!(summary);
        self
    }
}

/// The feature flags that select which sections a requested report must
/// contain. Used both to compute the `options_digest` cache key and to
/// test whether a cached snapshot's feature set is a superset of a new
/// request (§8 "report monotonicity" invariant).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub includes_watches: bool,
    pub includes_security: bool,
    pub includes_ai_analysis: bool,
    /// Fingerprint of the sampling model/tool-palette/checkpoint cadence
    /// used to produce `ai_analysis`, or `None` when AI analysis was not
    /// requested. Two AI-enriched reports with different `llm_key`s are
    /// never considered interchangeable even if both set
    /// `includes_ai_analysis`.
    pub llm_key: Option<String>,
}

impl ReportOptions {
    /// Superset test used by `ReportStore::get` (§4.E invariant): a
    /// cached record may satisfy a request only if it carries at least
    /// everything the request asks for.
    pub fn satisfies(&self, requested: &ReportOptions) -> bool {
        (self.includes_watches || !requested.includes_watches)
            && (self.includes_security || !requested.includes_security)
            && (self.includes_ai_analysis || !requested.includes_ai_analysis)
            && (!requested.includes_ai_analysis || self.llm_key == requested.llm_key)
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(u8::from(self.includes_watches).to_le_bytes());
        hasher.update(u8::from(self.includes_security).to_le_bytes());
        hasher.update(u8::from(self.includes_ai_analysis).to_le_bytes());
        if let Some(key) = &self.llm_key {
            hasher.update(key.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The canonical `{metadata, analysis}` document. Once emitted with a
/// given `generated_at` it is immutable — any further mutation produces
/// a new snapshot with a new timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSnapshot {
    pub metadata: ReportMetadata,
    pub analysis: AnalysisFragment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMetadata {
    pub user_id: String,
    pub dump_id: String,
    pub generated_at: DateTime<Utc>,
    pub options: ReportOptions,
}

impl ReportSnapshot {
    pub fn new(user_id: impl Into<String>, dump_id: impl Into<String>, options: ReportOptions, analysis: AnalysisFragment) -> Self {
        Self {
            metadata: ReportMetadata {
                user_id: user_id.into(),
                dump_id: dump_id.into(),
                generated_at: Utc::now(),
                options,
            },
            analysis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_only_present_fields() {
        let base = AnalysisFragment {
            crash: Some(serde_json::json!({"a": 1})),
            security: Some(serde_json::json!({"s": 1})),
            ..Default::default()
        };
        let patch = AnalysisFragment {
            crash: Some(serde_json::json!({"a": 2})),
            ..Default::default()
        };
        let merged = base.merged_with(patch);
        assert_eq!(merged.crash, Some(serde_json::json!({"a": 2})));
        assert_eq!(merged.security, Some(serde_json::json!({"s": 1})));
    }

    #[test]
    fn superset_matching() {
        let cached = ReportOptions {
            includes_watches: true,
            includes_security: true,
            includes_ai_analysis: false,
            llm_key: None,
        };
        let requested = ReportOptions {
            includes_watches: true,
            includes_security: false,
            includes_ai_analysis: false,
            llm_key: None,
        };
        assert!(cached.satisfies(&requested));
        assert!(!requested.satisfies(&cached));
    }

    #[test]
    fn ai_analysis_requires_matching_llm_key() {
        let cached = ReportOptions {
            includes_ai_analysis: true,
            llm_key: Some("k1".into()),
            ..Default::default()
        };
        let requested = ReportOptions {
            includes_ai_analysis: true,
            llm_key: Some("k2".into()),
            ..Default::default()
        };
        assert!(!cached.satisfies(&requested));
    }
}
