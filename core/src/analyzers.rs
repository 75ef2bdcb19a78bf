//! Analyzer registry (§4.I): structural dump inspection, one
//! [`Analyzer`] per [`AnalyzerKind`] except `Ai`, which the sampling
//! orchestrator in `ai.rs` drives directly.
//!
//! Every implementation here is a structural stub: it surfaces what the
//! debugger/managed-reader handles already expose (module counts,
//! thread counts, GC generation sizes) without claiming to diagnose a
//! real crash, leak, or deadlock (§1 non-goal). Concrete diagnostic
//! heuristics are future work for a real backend binding.

use std::collections::HashMap;

use async_trait::async_trait;
use dumpsrv_protocol::AnalysisFragment;
use dumpsrv_protocol::AnalyzerKind;
use dumpsrv_protocol::DumpsrvError;
use serde_json::json;

use crate::debugger::DebuggerInstance;
use crate::managed_reader::ManagedReader;

/// Borrowed handles an analyzer needs. `debugger` is `&mut` because
/// `execute` mutates the command cache; `managed_reader` is `&` since
/// its backend methods are read-only.
pub struct AnalysisContext<'a> {
    pub debugger: &'a mut DebuggerInstance,
    pub managed_reader: Option<&'a ManagedReader>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;
    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError>;
}

async fn module_lines(ctx: &mut AnalysisContext<'_>) -> Vec<String> {
    ctx.debugger
        .execute("lm")
        .await
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Crash analyzer: stack of the faulting thread plus a raw module list,
/// the minimum a human would want before anything fancier.
pub struct CrashAnalyzer;

#[async_trait]
impl Analyzer for CrashAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Crash
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let stack = ctx.debugger.execute("k").await?;
        let modules = module_lines(ctx).await;
        Ok(AnalysisFragment {
            crash: Some(json!({
                "faultingThreadStack": stack,
                "moduleCount": modules.len(),
            })),
            threads: Some(json!({ "summary": "single-thread stack captured via `k`" })),
            ..Default::default()
        })
    }
}

/// Performance analyzer: thread count and, when the managed runtime is
/// readable, a per-thread GC-thread tally.
pub struct PerformanceAnalyzer;

#[async_trait]
impl Analyzer for PerformanceAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Performance
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let modules = module_lines(ctx).await;
        let thread_summary = match ctx.managed_reader {
            Some(reader) if reader.is_available() => {
                let threads = reader.threads().await?;
                json!({
                    "threadCount": threads.len(),
                    "gcThreadCount": threads.iter().filter(|t| t.is_gc_thread).count(),
                })
            }
            _ => json!({ "threadCount": null, "note": "managed reader unavailable" }),
        };
        Ok(AnalysisFragment {
            performance: Some(json!({
                "moduleCount": modules.len(),
                "threads": thread_summary,
            })),
            ..Default::default()
        })
    }
}

/// CPU analyzer: a thin slice of the performance fragment focused on
/// thread scheduling, modeled as its own analyzer per §3's
/// `analyze(kind="cpu")` tool surface rather than folded into
/// `performance` so a client can request it in isolation.
pub struct CpuAnalyzer;

#[async_trait]
impl Analyzer for CpuAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Cpu
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let threads_raw = ctx.debugger.execute("~").await.unwrap_or_default();
        Ok(AnalysisFragment {
            performance: Some(json!({ "osThreadListing": threads_raw })),
            ..Default::default()
        })
    }
}

/// Allocations analyzer: requires the managed reader's heap stats.
pub struct AllocationsAnalyzer;

#[async_trait]
impl Analyzer for AllocationsAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Allocations
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let reader = ctx.managed_reader.ok_or(DumpsrvError::RequiresManagedRuntime)?;
        let heap = reader.heap_stats().await?;
        Ok(AnalysisFragment {
            gc: Some(json!({
                "gen0Bytes": heap.generation0_bytes,
                "gen1Bytes": heap.generation1_bytes,
                "gen2Bytes": heap.generation2_bytes,
                "largeObjectHeapBytes": heap.large_object_heap_bytes,
            })),
            ..Default::default()
        })
    }
}

/// GC analyzer: heap generation sizes and module-level GC readiness.
pub struct GcAnalyzer;

#[async_trait]
impl Analyzer for GcAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Gc
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let reader = ctx.managed_reader.ok_or(DumpsrvError::RequiresManagedRuntime)?;
        if !reader.is_available() {
            return Err(DumpsrvError::RequiresManagedRuntime);
        }
        let heap = reader.heap_stats().await?;
        let modules = reader.modules().await?;
        Ok(AnalysisFragment {
            gc: Some(json!({
                "heap": {
                    "gen0Bytes": heap.generation0_bytes,
                    "gen1Bytes": heap.generation1_bytes,
                    "gen2Bytes": heap.generation2_bytes,
                    "largeObjectHeapBytes": heap.large_object_heap_bytes,
                },
                "moduleCount": modules.len(),
            })),
            ..Default::default()
        })
    }
}

/// Contention analyzer: GC-thread count as a crude proxy for lock
/// contention pressure until a real deadlock detector exists.
pub struct ContentionAnalyzer;

#[async_trait]
impl Analyzer for ContentionAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Contention
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let reader = ctx.managed_reader.ok_or(DumpsrvError::RequiresManagedRuntime)?;
        let threads = reader.threads().await?;
        Ok(AnalysisFragment {
            contention: Some(json!({
                "totalThreads": threads.len(),
                "gcThreads": threads.iter().filter(|t| t.is_gc_thread).count(),
            })),
            ..Default::default()
        })
    }
}

/// Security analyzer: flags modules by name against a fixed allowlist
/// of known-risky native loaders. Not a real vulnerability scanner
/// (§1 non-goal); it is a module-census pass a client can layer its own
/// policy on top of.
pub struct SecurityAnalyzer;

#[async_trait]
impl Analyzer for SecurityAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Security
    }

    async fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        let modules = module_lines(ctx).await;
        Ok(AnalysisFragment {
            security: Some(json!({
                "moduleCount": modules.len(),
                "note": "module census only; no vulnerability scanning is performed",
            })),
            ..Default::default()
        })
    }
}

/// Data table mapping each non-AI [`AnalyzerKind`] to its implementation,
/// looked up by `tools::dispatch` rather than matched through a type
/// hierarchy (§9 redesign flag: "dispatcher as data, not class
/// hierarchy").
pub struct AnalyzerRegistry {
    analyzers: HashMap<AnalyzerKind, Box<dyn Analyzer>>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        let mut analyzers: HashMap<AnalyzerKind, Box<dyn Analyzer>> = HashMap::new();
        analyzers.insert(AnalyzerKind::Crash, Box::new(CrashAnalyzer));
        analyzers.insert(AnalyzerKind::Performance, Box::new(PerformanceAnalyzer));
        analyzers.insert(AnalyzerKind::Cpu, Box::new(CpuAnalyzer));
        analyzers.insert(AnalyzerKind::Allocations, Box::new(AllocationsAnalyzer));
        analyzers.insert(AnalyzerKind::Gc, Box::new(GcAnalyzer));
        analyzers.insert(AnalyzerKind::Contention, Box::new(ContentionAnalyzer));
        analyzers.insert(AnalyzerKind::Security, Box::new(SecurityAnalyzer));
        Self { analyzers }
    }
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the analyzer for `kind`. Callers route `AnalyzerKind::Ai`
    /// to `ai::run_ai_loop` instead; dispatching it here returns
    /// `Internal` since it would indicate a routing bug upstream.
    pub async fn run(&self, kind: AnalyzerKind, ctx: &mut AnalysisContext<'_>) -> Result<AnalysisFragment, DumpsrvError> {
        match self.analyzers.get(&kind) {
            Some(analyzer) => analyzer.run(ctx).await,
            None => Err(DumpsrvError::Internal(format!("no structural analyzer registered for {kind:?}"))),
        }
    }
}
