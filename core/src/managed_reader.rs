//! Managed-metadata reader (§4.B): read-only dump enrichment
//! independent of the debugger driver. No real CLR-MD binding is
//! vendored here (out of scope, §1); this crate implements the
//! `ManagedReaderBackend` boundary, the `Unavailable`-for-non-CLR
//! behavior, and a deterministic fake for tests.

use async_trait::async_trait;
use dumpsrv_protocol::DumpsrvError;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedModule {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedThread {
    pub index: u32,
    pub os_thread_id: u64,
    pub is_gc_thread: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeapStats {
    pub generation0_bytes: u64,
    pub generation1_bytes: u64,
    pub generation2_bytes: u64,
    pub large_object_heap_bytes: u64,
}

/// A resolved source location, the result of
/// [`ManagedReaderBackend::sequence_point_for_frame`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// The data-access surface a real CLR-MD (or equivalent) binding would
/// implement. `dumpsrv-core` ships only [`FakeManagedReaderBackend`];
/// wiring a real binding is explicitly out of scope (§1).
#[async_trait]
pub trait ManagedReaderBackend: Send + Sync {
    fn is_available(&self) -> bool;
    async fn modules(&self) -> Result<Vec<ManagedModule>, DumpsrvError>;
    async fn threads(&self) -> Result<Vec<ManagedThread>, DumpsrvError>;
    async fn heap_stats(&self) -> Result<HeapStats, DumpsrvError>;
    async fn type_by_method_table(&self, address: u64) -> Result<Option<String>, DumpsrvError>;
    async fn sequence_point_for_frame(&self, module: &str, method: &str, il_offset: u32) -> Result<Option<SourceLocation>, DumpsrvError>;
}

/// Deterministic in-memory backend for tests. `available = false`
/// models a non-CLR dump (every data-access method then returns
/// `RequiresManagedRuntime`, mirroring how a real backend would behave
/// when it has nothing to read).
#[derive(Default)]
pub struct FakeManagedReaderBackend {
    pub available: bool,
    pub modules: Vec<ManagedModule>,
    pub threads: Vec<ManagedThread>,
    pub heap_stats: Option<HeapStats>,
    pub method_tables: std::collections::HashMap<u64, String>,
    pub sequence_points: std::collections::HashMap<(String, String, u32), SourceLocation>,
}

impl FakeManagedReaderBackend {
    fn require_available(&self) -> Result<(), DumpsrvError> {
        if self.available {
            Ok(())
        } else {
            Err(DumpsrvError::RequiresManagedRuntime)
        }
    }
}

#[async_trait]
impl ManagedReaderBackend for FakeManagedReaderBackend {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn modules(&self) -> Result<Vec<ManagedModule>, DumpsrvError> {
        self.require_available()?;
        Ok(self.modules.clone())
    }

    async fn threads(&self) -> Result<Vec<ManagedThread>, DumpsrvError> {
        self.require_available()?;
        Ok(self.threads.clone())
    }

    async fn heap_stats(&self) -> Result<HeapStats, DumpsrvError> {
        self.require_available()?;
        self.heap_stats.clone().ok_or_else(|| DumpsrvError::Internal("heap stats not scripted".into()))
    }

    async fn type_by_method_table(&self, address: u64) -> Result<Option<String>, DumpsrvError> {
        self.require_available()?;
        Ok(self.method_tables.get(&address).cloned())
    }

    async fn sequence_point_for_frame(&self, module: &str, method: &str, il_offset: u32) -> Result<Option<SourceLocation>, DumpsrvError> {
        self.require_available()?;
        Ok(self.sequence_points.get(&(module.to_string(), method.to_string(), il_offset)).cloned())
    }
}

/// One session's managed-reader resource (§3 `ManagedReader`). Mirrors
/// [`crate::debugger::DebuggerInstance`]'s shape so both resources are
/// owned symmetrically under the session's single lock (§9 redesign
/// flag).
pub struct ManagedReader {
    backend: Box<dyn ManagedReaderBackend>,
}

impl ManagedReader {
    pub fn new(backend: Box<dyn ManagedReaderBackend>) -> Self {
        Self { backend }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub async fn modules(&self) -> Result<Vec<ManagedModule>, DumpsrvError> {
        self.backend.modules().await
    }

    pub async fn threads(&self) -> Result<Vec<ManagedThread>, DumpsrvError> {
        self.backend.threads().await
    }

    pub async fn heap_stats(&self) -> Result<HeapStats, DumpsrvError> {
        self.backend.heap_stats().await
    }

    pub async fn type_by_method_table(&self, address: u64) -> Result<Option<String>, DumpsrvError> {
        self.backend.type_by_method_table(address).await
    }

    pub async fn sequence_points_for_frame(&self, module: &str, method: &str, il_offset: u32) -> Result<Option<SourceLocation>, DumpsrvError> {
        self.backend.sequence_point_for_frame(module, method, il_offset).await
    }
}
