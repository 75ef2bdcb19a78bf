//! Symbol policy engine (§4.C): per-session ordered search paths and
//! the invalidation boundary between symbol changes and everything
//! that depends on them (command cache, source-link resolver, cached
//! report).

use std::path::Path;
use std::path::PathBuf;

use dumpsrv_protocol::DumpsrvError;
use wildmatch::WildMatch;

/// One layer of the search-path stack, in priority order. The engine
/// never reorders these; `configure` only fills in the per-dump and
/// extra-path layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolPathLayer {
    MicrosoftPublic,
    PerDumpExtracted,
    PerDumpDatadog,
    UserProvided(String),
    GlobalCache,
}

/// Resolves the ordered symbol search path for one `(userId, dumpId)`
/// pair, laid out as `{storage}/{userId}/.symbols_{dumpId}/...` (§4.C).
pub struct SymbolPolicy {
    storage_root: PathBuf,
    global_cache_dir: PathBuf,
}

impl SymbolPolicy {
    pub fn new(storage_root: impl Into<PathBuf>, global_cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            global_cache_dir: global_cache_dir.into(),
        }
    }

    fn per_dump_dir(&self, user_id: &str, dump_id: &str) -> PathBuf {
        self.storage_root.join(user_id).join(format!(".symbols_{dump_id}"))
    }

    /// Builds the ordered layer list for a dump, inserting `extra`
    /// user-provided directories after the per-dump layers and before
    /// the global cache, per the §4.C priority list.
    pub fn configure(&self, user_id: &str, dump_id: &str, extra: &[String]) -> Vec<SymbolPathLayer> {
        let mut layers = vec![SymbolPathLayer::MicrosoftPublic, SymbolPathLayer::PerDumpExtracted, SymbolPathLayer::PerDumpDatadog];
        layers.extend(extra.iter().cloned().map(SymbolPathLayer::UserProvided));
        layers.push(SymbolPathLayer::GlobalCache);
        let _ = (user_id, dump_id);
        layers
    }

    /// Renders the layer list as the debugger-specific `.sympath`
    /// string, one `build_debugger_path(kind)` call per backend flavor
    /// (`kind` selects e.g. `"lldb"` vs `"cdb"` separator conventions).
    pub fn build_debugger_path(&self, user_id: &str, dump_id: &str, extra: &[String], kind: &str) -> String {
        let separator = if kind == "cdb" { ";" } else { ":" };
        let per_dump = self.per_dump_dir(user_id, dump_id);
        self.configure(user_id, dump_id, extra)
            .into_iter()
            .map(|layer| self.layer_path(&per_dump, layer))
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn layer_path(&self, per_dump: &Path, layer: SymbolPathLayer) -> String {
        match layer {
            SymbolPathLayer::MicrosoftPublic => "srv*https://msdl.microsoft.com/download/symbols".to_string(),
            SymbolPathLayer::PerDumpExtracted => per_dump.join("extracted").display().to_string(),
            SymbolPathLayer::PerDumpDatadog => per_dump.join("datadog").display().to_string(),
            SymbolPathLayer::UserProvided(path) => path,
            SymbolPathLayer::GlobalCache => self.global_cache_dir.display().to_string(),
        }
    }

    /// Persists one uploaded symbol file into the per-dump `extracted`
    /// layer (`POST /api/symbols/upload`). `file_name` is sanitized to
    /// its final path component so a crafted name can't escape the
    /// per-dump directory.
    pub async fn store_extracted_file(&self, user_id: &str, dump_id: &str, file_name: &str, bytes: &[u8]) -> Result<(), DumpsrvError> {
        let safe_name = Path::new(file_name).file_name().ok_or_else(|| DumpsrvError::InvalidArgument(format!("invalid symbol file name '{file_name}'")))?;
        let dir = self.per_dump_dir(user_id, dump_id).join("extracted");
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(safe_name), bytes).await?;
        Ok(())
    }

    /// Names of every file currently staged under the per-dump
    /// `extracted`/`datadog` layers (`GET /api/symbols/dump/{dumpId}`).
    pub async fn list_extracted(&self, user_id: &str, dump_id: &str) -> Result<Vec<String>, DumpsrvError> {
        let per_dump = self.per_dump_dir(user_id, dump_id);
        let mut names = Vec::new();
        for sub in ["extracted", "datadog"] {
            let dir = per_dump.join(sub);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(format!("{sub}/{name}"));
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Removes the per-dump symbol directory tree (`clear_dump_cache`).
    pub async fn clear_dump_cache(&self, user_id: &str, dump_id: &str) -> std::io::Result<()> {
        let dir = self.per_dump_dir(user_id, dump_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether `module_name` matches one of the glob patterns a user
    /// supplied to scope symbol loading to a subset of modules (used by
    /// the `symbols(action="list")` tool to filter large symbol sets).
    pub fn module_matches_any(patterns: &[String], module_name: &str) -> bool {
        patterns.is_empty() || patterns.iter().any(|p| WildMatch::new(p).matches(module_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_order_is_fixed_with_extras_before_global_cache() {
        let policy = SymbolPolicy::new("/srv/storage", "/srv/storage/_global_symbols");
        let layers = policy.configure("u1", "d1", &["/mnt/extra".to_string()]);
        assert_eq!(layers.len(), 5);
        assert_eq!(layers[0], SymbolPathLayer::MicrosoftPublic);
        assert_eq!(layers[3], SymbolPathLayer::UserProvided("/mnt/extra".to_string()));
        assert_eq!(layers[4], SymbolPathLayer::GlobalCache);
    }

    #[test]
    fn build_debugger_path_uses_semicolons_for_cdb() {
        let policy = SymbolPolicy::new("/srv/storage", "/srv/storage/_global_symbols");
        let path = policy.build_debugger_path("u1", "d1", &[], "cdb");
        assert_eq!(path.matches(';').count(), 3);
    }

    #[tokio::test]
    async fn store_extracted_file_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SymbolPolicy::new(dir.path(), dir.path().join("_global_symbols"));
        policy.store_extracted_file("u1", "d1", "ntdll.pdb", b"stub").await.unwrap();
        let listed = policy.list_extracted("u1", "d1").await.unwrap();
        assert_eq!(listed, vec!["extracted/ntdll.pdb".to_string()]);
    }

    #[tokio::test]
    async fn store_extracted_file_rejects_path_traversal_in_name_via_sanitization() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SymbolPolicy::new(dir.path(), dir.path().join("_global_symbols"));
        policy.store_extracted_file("u1", "d1", "../../evil.pdb", b"stub").await.unwrap();
        let listed = policy.list_extracted("u1", "d1").await.unwrap();
        assert_eq!(listed, vec!["extracted/evil.pdb".to_string()]);
    }

    #[test]
    fn module_glob_matching() {
        let patterns = vec!["System.*".to_string()];
        assert!(SymbolPolicy::module_matches_any(&patterns, "System.Private.CoreLib"));
        assert!(!SymbolPolicy::module_matches_any(&patterns, "MyApp.Core"));
        assert!(SymbolPolicy::module_matches_any(&[], "anything"));
    }
}
