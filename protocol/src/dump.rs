use serde::Deserialize;
use serde::Serialize;

/// Per-user-unique identity plus lazily filled metadata for an uploaded
/// dump file. Invariant: the metadata file and the dump file share a
/// filename stem (`{dumpId}.dmp` / `{dumpId}.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dump {
    pub dump_id: String,
    pub user_id: String,
    /// Path to the `.dmp` file relative to the storage root.
    pub path: String,
    pub sha256: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: DumpMetadata,
}

/// Fields that are unknown until the dump is first opened by the
/// debugger driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DumpMetadata {
    pub is_alpine_dump: Option<bool>,
    pub is_dotnet: Option<bool>,
    pub runtime_version: Option<String>,
    pub architecture: Option<String>,
    /// Set for self-contained apps where the managed entry point ships
    /// its own native host executable.
    pub executable_path: Option<String>,
}

impl Dump {
    pub fn new(user_id: impl Into<String>, dump_id: impl Into<String>, path: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            dump_id: dump_id.into(),
            user_id: user_id.into(),
            path: path.into(),
            sha256: sha256.into(),
            description: None,
            metadata: DumpMetadata::default(),
        }
    }
}
