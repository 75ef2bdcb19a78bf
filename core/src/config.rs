//! Layered configuration (§4.K): built-in defaults, then `dumpsrv.toml`,
//! then environment toggles, then explicit [`ConfigOverrides`], applied
//! by destructuring `ConfigOverrides` fully so a newly added override
//! field can't be silently forgotten.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

const CONFIG_TOML_FILE: &str = "dumpsrv.toml";

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dumpsrv")
}

/// Fully resolved configuration used by every other module in this
/// crate. Construct via [`Config::load`]; never mutate a live instance
/// in place (handlers hold it behind `Arc`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root directory for sessions/dumps/symbols/watches (§6 layout).
    pub storage_dir: PathBuf,

    pub bind_addr: String,

    /// Max active sessions per user before `session.create` fails
    /// `QuotaExceeded`.
    pub session_quota_per_user: usize,

    pub session_idle_timeout: Duration,

    /// Per-command debugger execution timeout; not cached on expiry.
    pub debugger_command_timeout: Duration,

    /// Deadline applied to one JSON-RPC request/response round-trip.
    pub request_deadline: Duration,

    /// Depth at which `POST /mcp/message` starts returning 429 for a
    /// given session.
    pub session_queue_depth_limit: usize,

    pub ai_max_iterations: u32,
    pub ai_checkpoint_every: u32,
    pub ai_max_tokens: u32,
    pub ai_evidence_excerpt_max_chars: usize,

    /// Total accumulated excerpt bytes across the ledger at which the
    /// AI loop terminates early, one of the §4.I step 5 termination
    /// conditions alongside `done`/confidence/iteration cap.
    pub ai_evidence_budget_bytes: usize,

    /// When `true`, every sampling prompt/response is additionally
    /// logged to `ai_sampling_trace_dir` as JSON lines (`AI_SAMPLING_TRACE`).
    pub ai_sampling_trace: bool,
    pub ai_sampling_trace_dir: Option<PathBuf>,

    pub datadog_trace_symbols_enabled: bool,

    /// `X-API-Key` values accepted by the server. Empty means auth is
    /// disabled (local/dev use).
    pub api_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            bind_addr: "127.0.0.1:8787".to_string(),
            session_quota_per_user: 5,
            session_idle_timeout: Duration::from_secs(30 * 60),
            debugger_command_timeout: Duration::from_secs(5 * 60),
            request_deadline: Duration::from_secs(10 * 60),
            session_queue_depth_limit: 16,
            ai_max_iterations: 100,
            ai_checkpoint_every: 5,
            ai_max_tokens: 8192,
            ai_evidence_excerpt_max_chars: 2000,
            ai_evidence_budget_bytes: 20_000,
            ai_sampling_trace: false,
            ai_sampling_trace_dir: None,
            datadog_trace_symbols_enabled: false,
            api_keys: Vec::new(),
        }
    }
}

/// The on-disk shape of `dumpsrv.toml`: every field optional so a
/// partial file only overrides what it mentions.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
struct ConfigToml {
    storage_dir: Option<PathBuf>,
    bind_addr: Option<String>,
    session_quota_per_user: Option<usize>,
    session_idle_timeout_seconds: Option<u64>,
    debugger_command_timeout_seconds: Option<u64>,
    request_deadline_seconds: Option<u64>,
    session_queue_depth_limit: Option<usize>,
    ai_max_iterations: Option<u32>,
    ai_checkpoint_every: Option<u32>,
    ai_max_tokens: Option<u32>,
    ai_evidence_excerpt_max_chars: Option<usize>,
    ai_evidence_budget_bytes: Option<usize>,
    datadog_trace_symbols_enabled: Option<bool>,
    #[serde(default)]
    api_keys: Vec<String>,
}

/// CLI-supplied overrides, applied last (after environment toggles) so
/// an explicit `--bind` always wins. Every field is optional so an
/// absent override leaves the layered default/file/env value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub storage_dir: Option<PathBuf>,
    pub bind_addr: Option<String>,
}

impl Config {
    /// Loads defaults, merges `{config_path}` (defaulting to
    /// `{storage_dir}/dumpsrv.toml` if it exists), then environment
    /// toggles (§6), then `overrides`.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> std::io::Result<Self> {
        let mut resolved = Config::default();

        let toml_path = config_path.map(Path::to_path_buf).or_else(|| {
            let candidate = resolved.storage_dir.join(CONFIG_TOML_FILE);
            candidate.is_file().then_some(candidate)
        });

        if let Some(path) = toml_path {
            let text = std::fs::read_to_string(&path)?;
            let parsed: ConfigToml = toml::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            resolved.apply_toml(parsed);
        }

        resolved.apply_env();

        let ConfigOverrides { storage_dir, bind_addr } = overrides;
        if let Some(dir) = storage_dir {
            resolved.storage_dir = dir;
        }
        if let Some(addr) = bind_addr {
            resolved.bind_addr = addr;
        }

        Ok(resolved)
    }

    fn apply_toml(&mut self, cfg: ConfigToml) {
        if let Some(v) = cfg.storage_dir {
            self.storage_dir = v;
        }
        if let Some(v) = cfg.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = cfg.session_quota_per_user {
            self.session_quota_per_user = v;
        }
        if let Some(v) = cfg.session_idle_timeout_seconds {
            self.session_idle_timeout = Duration::from_secs(v);
        }
        if let Some(v) = cfg.debugger_command_timeout_seconds {
            self.debugger_command_timeout = Duration::from_secs(v);
        }
        if let Some(v) = cfg.request_deadline_seconds {
            self.request_deadline = Duration::from_secs(v);
        }
        if let Some(v) = cfg.session_queue_depth_limit {
            self.session_queue_depth_limit = v;
        }
        if let Some(v) = cfg.ai_max_iterations {
            self.ai_max_iterations = v;
        }
        if let Some(v) = cfg.ai_checkpoint_every {
            self.ai_checkpoint_every = v;
        }
        if let Some(v) = cfg.ai_max_tokens {
            self.ai_max_tokens = v;
        }
        if let Some(v) = cfg.ai_evidence_excerpt_max_chars {
            self.ai_evidence_excerpt_max_chars = v;
        }
        if let Some(v) = cfg.ai_evidence_budget_bytes {
            self.ai_evidence_budget_bytes = v;
        }
        if let Some(v) = cfg.datadog_trace_symbols_enabled {
            self.datadog_trace_symbols_enabled = v;
        }
        if !cfg.api_keys.is_empty() {
            self.api_keys = cfg.api_keys;
        }
    }

    /// Environment toggles (§6), applied after the TOML file so
    /// container/CI deployments can override without a mounted file.
    fn apply_env(&mut self) {
        let env = EnvReader::from_process();
        self.apply_env_from(&env);
    }

    fn apply_env_from(&mut self, env: &EnvReader) {
        if let Some(v) = env.get("DUMPSRV_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = env.get("DUMPSRV_BIND_ADDR") {
            self.bind_addr = v.to_string();
        }
        if let Some(v) = env.get_u32("AI_SAMPLING_CHECKPOINT_EVERY") {
            self.ai_checkpoint_every = v;
        }
        if let Some(v) = env.get_usize("AI_EVIDENCE_EXCERPT_MAX_CHARS") {
            self.ai_evidence_excerpt_max_chars = v;
        }
        if let Some(v) = env.get_bool("DATADOG_TRACE_SYMBOLS_ENABLED") {
            self.datadog_trace_symbols_enabled = v;
        }
        if let Some(v) = env.get_bool("AI_SAMPLING_TRACE") {
            self.ai_sampling_trace = v;
        }
        if let Some(v) = env.get("AI_SAMPLING_TRACE_DIR") {
            self.ai_sampling_trace_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get_u64("DUMPSRV_DEBUGGER_TIMEOUT_SECONDS") {
            self.debugger_command_timeout = Duration::from_secs(v);
        }
    }

    /// `tracing-subscriber` env-filter string, read from `DUMPSRV_LOG`
    /// (ambient addition, not part of the layered `Config` itself since
    /// the logging subscriber is installed before any config is loaded).
    pub fn log_filter() -> String {
        std::env::var("DUMPSRV_LOG").unwrap_or_else(|_| "info".to_string())
    }
}

/// Thin indirection over `std::env::var` so the merge logic is testable
/// without mutating the real process environment.
struct EnvReader(HashMap<String, String>);

impl EnvReader {
    fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    #[cfg(test)]
    fn from_map(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.session_quota_per_user, 5);
        assert_eq!(cfg.ai_max_iterations, 100);
        assert_eq!(cfg.ai_max_tokens, 8192);
    }

    #[test]
    fn env_overrides_win_over_defaults() {
        let mut cfg = Config::default();
        let mut map = HashMap::new();
        map.insert("AI_SAMPLING_CHECKPOINT_EVERY".to_string(), "9".to_string());
        map.insert("DATADOG_TRACE_SYMBOLS_ENABLED".to_string(), "true".to_string());
        cfg.apply_env_from(&EnvReader::from_map(map));
        assert_eq!(cfg.ai_checkpoint_every, 9);
        assert!(cfg.datadog_trace_symbols_enabled);
    }

    #[test]
    fn toml_merge_only_touches_present_fields() {
        let mut cfg = Config::default();
        let partial = ConfigToml {
            ai_max_tokens: Some(4096),
            ..Default::default()
        };
        cfg.apply_toml(partial);
        assert_eq!(cfg.ai_max_tokens, 4096);
        assert_eq!(cfg.session_quota_per_user, 5);
    }
}
