//! Tool dispatcher (§4.H): a data table of `(name, schema, handler)`
//! entries rather than a class hierarchy per tool (§9 redesign flag).
//! `tool_specs()` feeds `tools/list`; `dispatch()` is the single entry
//! point `tools/call` routes through, shared verbatim by both the HTTP
//! transport and (in tests) direct in-process calls.

use std::sync::Arc;

use async_trait::async_trait;
use dumpsrv_mcp_types::CallToolRequestParams;
use dumpsrv_mcp_types::CallToolResult;
use dumpsrv_mcp_types::Tool;
use dumpsrv_protocol::AnalysisFragment;
use dumpsrv_protocol::AnalyzerKind;
use dumpsrv_protocol::DebuggerState;
use dumpsrv_protocol::DumpsrvError;
use dumpsrv_protocol::EvidenceLedger;
use dumpsrv_protocol::ReportOptions;
use dumpsrv_protocol::ReportSnapshot;
use dumpsrv_protocol::Watch;
use schemars::JsonSchema;
use schemars::schema_for;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

use crate::ai;
use crate::ai::SamplingClient;
use crate::analyzers::AnalysisContext;
use crate::analyzers::AnalyzerRegistry;
use crate::config::Config;
use crate::debugger::DebuggerBackend;
use crate::debugger::DebuggerInstance;
use crate::dumps::DumpStore;
use crate::managed_reader::ManagedReader;
use crate::managed_reader::ManagedReaderBackend;
use crate::report_store::ReportStore;
use crate::session::SessionManager;
use crate::symbols::SymbolPolicy;
use crate::watch::WatchStore;

/// Everything a tool handler needs, shared behind `Arc`s so cloning a
/// context per request is cheap.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub dumps: Arc<DumpStore>,
    pub reports: Arc<ReportStore>,
    pub watches: Arc<WatchStore>,
    pub symbols: Arc<SymbolPolicy>,
    pub analyzers: Arc<AnalyzerRegistry>,
    pub debugger_backend_factory: Arc<dyn Fn() -> Box<dyn DebuggerBackend> + Send + Sync>,
    pub managed_reader_backend_factory: Arc<dyn Fn() -> Box<dyn ManagedReaderBackend> + Send + Sync>,
    /// Resolves a `sessionId` to the client-specific sampling channel.
    /// Implemented by `dumpsrv-server` against its SSE pending-request
    /// table; a tool call against a client without `sampling` in its
    /// `initialize` capabilities never reaches this (see
    /// `dumpsrv_mcp_types::tool::ClientCapabilities`).
    pub sampling_for_session: Arc<dyn Fn(Uuid) -> Option<Arc<dyn SamplingClient>> + Send + Sync>,
}

/// Digest folding the sampling model name, tool palette version, and
/// checkpoint cadence into the `ReportOptions::llm_key` used for report
/// cache superset matching (§9 Open Question ii).
pub fn llm_key(model: &str, checkpoint_every: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(ai::TOOL_PALETTE_VERSION.as_bytes());
    hasher.update(checkpoint_every.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

fn ok(value: Value) -> CallToolResult {
    CallToolResult::text(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
}

fn err(e: DumpsrvError) -> CallToolResult {
    CallToolResult::error(e.to_string())
}

fn invalid(msg: impl Into<String>) -> DumpsrvError {
    DumpsrvError::InvalidArgument(msg.into())
}

fn require<T>(opt: Option<T>, field: &str) -> Result<T, DumpsrvError> {
    opt.ok_or_else(|| invalid(format!("missing required field '{field}'")))
}

macro_rules! tool_spec_entries {
    ($($name:literal => $ty:ty),+ $(,)?) => {
        pub fn tool_specs() -> Vec<Tool> {
            vec![$(Tool {
                name: $name.to_string(),
                description: None,
                input_schema: serde_json::to_value(schema_for!($ty)).unwrap_or_else(|_| json!({})),
            }),+]
        }
    };
}

tool_spec_entries! {
    "session" => SessionArgs,
    "dump" => DumpArgs,
    "exec" => ExecArgs,
    "report" => ReportArgs,
    "analyze" => AnalyzeArgs,
    "compare" => CompareArgs,
    "watch" => WatchArgs,
    "symbols" => SymbolsArgs,
    "source_link" => SourceLinkArgs,
    "inspect" => InspectArgs,
    "datadog_symbols" => DatadogSymbolsArgs,
}

/// Single entry point for `tools/call` (§4.H). `user_id` comes from the
/// transport's auth layer (`X-API-Key`), never from `request.arguments`.
pub async fn dispatch(ctx: &ToolContext, user_id: &str, request: CallToolRequestParams) -> CallToolResult {
    let result = match request.name.as_str() {
        "session" => session_tool(ctx, user_id, request.arguments).await,
        "dump" => dump_tool(ctx, user_id, request.arguments).await,
        "exec" => exec_tool(ctx, user_id, request.arguments).await,
        "report" => report_tool(ctx, user_id, request.arguments).await,
        "analyze" => analyze_tool(ctx, user_id, request.arguments).await,
        "compare" => compare_tool(ctx, user_id, request.arguments).await,
        "watch" => watch_tool(ctx, user_id, request.arguments).await,
        "symbols" => symbols_tool(ctx, user_id, request.arguments).await,
        "source_link" => source_link_tool(ctx, user_id, request.arguments).await,
        "inspect" => inspect_tool(ctx, user_id, request.arguments).await,
        "datadog_symbols" => datadog_symbols_tool(ctx, user_id, request.arguments).await,
        other => Err(DumpsrvError::InvalidArgument(format!("unknown tool '{other}'"))),
    };
    match result {
        Ok(value) => ok(value),
        Err(e) => err(e),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, DumpsrvError> {
    serde_json::from_value(args).map_err(|e| invalid(format!("bad arguments: {e}")))
}

// ---------------------------------------------------------------- session

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum SessionAction {
    Create,
    List,
    Close,
    DebuggerInfo,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SessionArgs {
    action: SessionAction,
    #[serde(default)]
    session_id: Option<Uuid>,
}

async fn session_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: SessionArgs = parse_args(args)?;
    match args.action {
        SessionAction::Create => {
            let session_id = ctx.sessions.create(user_id).await?;
            Ok(json!({ "sessionId": session_id }))
        }
        SessionAction::List => Ok(json!({ "sessions": ctx.sessions.list(user_id).await })),
        SessionAction::Close => {
            let session_id = require(args.session_id, "session_id")?;
            ctx.sessions.close(session_id, user_id).await?;
            Ok(json!({ "closed": true }))
        }
        SessionAction::DebuggerInfo => {
            let session_id = require(args.session_id, "session_id")?;
            let entry = ctx.sessions.acquire(session_id, user_id).await?;
            let guard = entry.lock().await;
            let (state, is_dotnet, is_sos_loaded) = match &guard.debugger {
                Some(d) => (d.state(), d.is_dotnet_dump(), d.is_sos_loaded()),
                None => (dumpsrv_protocol::DebuggerState::Uninitialized, false, false),
            };
            Ok(json!({
                "state": state,
                "isDotnet": is_dotnet,
                "isSosLoaded": is_sos_loaded,
                "currentDumpId": guard.session.current_dump_id,
            }))
        }
    }
}

// ------------------------------------------------------------------- dump

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum DumpAction {
    Upload,
    List,
    Metadata,
    Delete,
    Open,
    Close,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DumpArgs {
    action: DumpAction,
    #[serde(default)]
    session_id: Option<Uuid>,
    #[serde(default)]
    dump_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    /// Base64-encoded dump bytes, present only for `action="upload"`.
    #[serde(default)]
    data_base64: Option<String>,
    #[serde(default)]
    executable_path: Option<String>,
}

fn decode_base64(data: &str) -> Result<Vec<u8>, DumpsrvError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data).map_err(|e| invalid(format!("invalid base64: {e}")))
}

async fn dump_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: DumpArgs = parse_args(args)?;
    match args.action {
        DumpAction::Upload => {
            let data = decode_base64(&require(args.data_base64, "data_base64")?)?;
            let dump = ctx.dumps.upload(user_id, &data, args.description).await?;
            Ok(json!(dump))
        }
        DumpAction::List => Ok(json!({ "dumps": ctx.dumps.list(user_id).await? })),
        DumpAction::Metadata => {
            let dump_id = require(args.dump_id, "dump_id")?;
            Ok(json!(*ctx.dumps.get(user_id, &dump_id).await?))
        }
        DumpAction::Delete => {
            let dump_id = require(args.dump_id, "dump_id")?;
            ctx.dumps.remove(user_id, &dump_id).await?;
            Ok(json!({ "deleted": true }))
        }
        DumpAction::Open => {
            let session_id = require(args.session_id, "session_id")?;
            let dump_id = require(args.dump_id, "dump_id")?;
            let dump = ctx.dumps.get(user_id, &dump_id).await?;

            let entry = ctx.sessions.acquire(session_id, user_id).await?;
            let mut guard = entry.lock().await;
            let debugger = guard
                .debugger
                .get_or_insert_with(|| DebuggerInstance::new((ctx.debugger_backend_factory)(), ctx.config.debugger_command_timeout));
            debugger.open_dump(&dump.path, args.executable_path.as_deref()).await?;

            if debugger.is_dotnet_dump() {
                guard.managed_reader = Some(ManagedReader::new((ctx.managed_reader_backend_factory)()));
            }
            guard.session.current_dump_id = Some(dump_id.clone());
            guard.session.debugger_state = debugger.state();
            guard.session.has_managed_reader = guard.managed_reader.is_some();
            let is_dotnet = debugger.is_dotnet_dump();
            drop(guard);
            ctx.sessions.persist(session_id).await?;

            if is_dotnet {
                ctx.dumps.update_metadata(user_id, &dump_id, |m| m.is_dotnet = Some(true)).await?;
            }
            Ok(json!({ "opened": true, "isDotnet": is_dotnet }))
        }
        DumpAction::Close => {
            let session_id = require(args.session_id, "session_id")?;
            let entry = ctx.sessions.acquire(session_id, user_id).await?;
            let mut guard = entry.lock().await;
            if let Some(debugger) = guard.debugger.as_mut() {
                debugger.close_dump().await?;
                guard.session.debugger_state = debugger.state();
            }
            guard.session.current_dump_id = None;
            drop(guard);
            ctx.sessions.persist(session_id).await?;
            Ok(json!({ "closed": true }))
        }
    }
}

// ------------------------------------------------------------------- exec

#[derive(Debug, Deserialize, JsonSchema)]
struct ExecArgs {
    session_id: Uuid,
    command: String,
}

async fn exec_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: ExecArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;
    let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
    let output = debugger.execute(&args.command).await?;
    Ok(json!({ "output": output }))
}

// ----------------------------------------------------------------- report

#[derive(Debug, Deserialize, JsonSchema)]
struct ReportArgs {
    session_id: Uuid,
    #[serde(default)]
    include_watches: bool,
    #[serde(default)]
    include_security: bool,
    #[serde(default)]
    include_ai_analysis: bool,
    #[serde(default)]
    ai_model: Option<String>,
}

/// Runs the baseline structural analyzers (crash always; performance
/// and, when the managed runtime is readable, gc) and merges their
/// fragments, the shared first step for both `report` and `analyze`.
async fn run_baseline_analyzers(ctx: &ToolContext, debugger: &mut DebuggerInstance, managed_reader: Option<&ManagedReader>) -> Result<dumpsrv_protocol::AnalysisFragment, DumpsrvError> {
    let mut fragment = dumpsrv_protocol::AnalysisFragment::default();
    {
        let mut analysis_ctx = AnalysisContext { debugger, managed_reader };
        fragment = fragment.merged_with(ctx.analyzers.run(AnalyzerKind::Crash, &mut analysis_ctx).await?);
        fragment = fragment.merged_with(ctx.analyzers.run(AnalyzerKind::Performance, &mut analysis_ctx).await?);
    }
    if let Some(reader) = managed_reader {
        if reader.is_available() {
            let mut analysis_ctx = AnalysisContext { debugger, managed_reader: Some(reader) };
            if let Ok(gc) = ctx.analyzers.run(AnalyzerKind::Gc, &mut analysis_ctx).await {
                fragment = fragment.merged_with(gc);
            }
        }
    }
    Ok(fragment)
}

async fn attach_watches(ctx: &ToolContext, user_id: &str, dump_id: &str, debugger: &mut DebuggerInstance, fragment: dumpsrv_protocol::AnalysisFragment) -> Result<dumpsrv_protocol::AnalysisFragment, DumpsrvError> {
    let watches = ctx.watches.list(user_id, dump_id).await?;
    let mut results = Vec::with_capacity(watches.len());
    for watch in &watches {
        let command = watch.expression.clone();
        let output = debugger.execute(&command).await;
        let result = match output {
            Ok(raw) => crate::watch::evaluate(watch, |_expr| async { Ok(raw) }).await,
            Err(e) => crate::watch::evaluate(watch, |_expr| async { Err(e) }).await,
        };
        results.push(result);
    }
    Ok(dumpsrv_protocol::AnalysisFragment {
        watches: Some(json!(results)),
        ..fragment
    })
}

async fn report_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: ReportArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;
    let dump_id = guard.session.current_dump_id.clone().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;

    let model = args.ai_model.clone().unwrap_or_else(|| "default".to_string());
    let requested = ReportOptions {
        includes_watches: args.include_watches,
        includes_security: args.include_security,
        includes_ai_analysis: args.include_ai_analysis,
        llm_key: args.include_ai_analysis.then(|| llm_key(&model, ctx.config.ai_checkpoint_every)),
    };

    if let Some(cached) = ctx.reports.get(user_id, &dump_id, &requested).await {
        return Ok(json!(cached));
    }

    let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
    let managed_reader = guard.managed_reader.as_ref();
    let mut fragment = run_baseline_analyzers(ctx, debugger, managed_reader).await?;

    if requested.includes_security {
        let mut analysis_ctx = AnalysisContext { debugger, managed_reader };
        fragment = fragment.merged_with(ctx.analyzers.run(AnalyzerKind::Security, &mut analysis_ctx).await?);
    }
    if requested.includes_watches {
        fragment = attach_watches(ctx, user_id, &dump_id, debugger, fragment).await?;
    }

    let mut snapshot = ReportSnapshot::new(user_id, &dump_id, requested.clone(), fragment);

    if requested.includes_ai_analysis {
        let sampling = (ctx.sampling_for_session)(args.session_id).ok_or_else(|| DumpsrvError::Preconditioned("client did not advertise sampling capability".into()))?;
        let mut ledger = EvidenceLedger::new(dump_id.clone());
        let cancellation = guard.cancellation.clone();
        let loop_cfg = ai::AiLoopConfig::from(ctx.config.as_ref());
        let ai_fragment = ai::run_ai_loop(sampling.as_ref(), &model, debugger, managed_reader, &snapshot, &mut ledger, &cancellation, &loop_cfg).await?;
        snapshot.analysis = snapshot.analysis.clone().merged_with(ai_fragment);
    }

    ctx.reports.put(snapshot.clone()).await?;
    Ok(json!(snapshot))
}

// ---------------------------------------------------------------- analyze

#[derive(Debug, Deserialize, JsonSchema)]
struct AnalyzeArgs {
    session_id: Uuid,
    kind: AnalyzerKind,
    #[serde(default)]
    ai_model: Option<String>,
}

async fn analyze_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: AnalyzeArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;
    let dump_id = guard.session.current_dump_id.clone().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
    let model = args.ai_model.clone().unwrap_or_else(|| "default".to_string());

    let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
    let managed_reader = guard.managed_reader.as_ref();

    let base_options = ReportOptions::default();
    let existing = ctx.reports.get(user_id, &dump_id, &base_options).await;
    let mut snapshot = existing.unwrap_or_else(|| ReportSnapshot::new(user_id, &dump_id, base_options, dumpsrv_protocol::AnalysisFragment::default()));

    let fragment = if args.kind == AnalyzerKind::Ai {
        let sampling = (ctx.sampling_for_session)(args.session_id).ok_or_else(|| DumpsrvError::Preconditioned("client did not advertise sampling capability".into()))?;
        let mut ledger = EvidenceLedger::new(dump_id.clone());
        let cancellation = guard.cancellation.clone();
        let loop_cfg = ai::AiLoopConfig::from(ctx.config.as_ref());
        ai::run_ai_loop(sampling.as_ref(), &model, debugger, managed_reader, &snapshot, &mut ledger, &cancellation, &loop_cfg).await?
    } else {
        let mut analysis_ctx = AnalysisContext { debugger, managed_reader };
        ctx.analyzers.run(args.kind, &mut analysis_ctx).await?
    };

    snapshot.analysis = snapshot.analysis.clone().merged_with(fragment.clone());
    ctx.reports.put(snapshot).await?;
    Ok(json!(fragment))
}

// ---------------------------------------------------------------- compare

#[derive(Debug, Deserialize, JsonSchema)]
struct CompareArgs {
    session_id: Uuid,
    other_dump_id: String,
    kind: AnalyzerKind,
}

/// Side-by-side structural comparison: runs (or reuses a cached) `kind`
/// analysis for the session's current dump and for `other_dump_id`
/// under a freshly opened, throwaway debugger instance, then returns
/// both fragments untouched. Not a semantic diff (§1 non-goal); the
/// caller does its own comparison on the returned JSON.
async fn compare_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: CompareArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;
    let dump_a = guard.session.current_dump_id.clone().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
    let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
    let managed_reader = guard.managed_reader.as_ref();
    let mut ctx_a = AnalysisContext { debugger, managed_reader };
    let fragment_a = ctx.analyzers.run(args.kind, &mut ctx_a).await?;
    drop(guard);

    let dump_b = ctx.dumps.get(user_id, &args.other_dump_id).await?;
    let mut scratch_debugger = DebuggerInstance::new((ctx.debugger_backend_factory)(), ctx.config.debugger_command_timeout);
    scratch_debugger.open_dump(&dump_b.path, None).await?;
    let scratch_reader = if scratch_debugger.is_dotnet_dump() {
        Some(ManagedReader::new((ctx.managed_reader_backend_factory)()))
    } else {
        None
    };
    let mut ctx_b = AnalysisContext {
        debugger: &mut scratch_debugger,
        managed_reader: scratch_reader.as_ref(),
    };
    let fragment_b = ctx.analyzers.run(args.kind, &mut ctx_b).await?;
    scratch_debugger.dispose().await;

    Ok(json!({
        "dumpIdA": dump_a,
        "dumpIdB": args.other_dump_id,
        "kind": args.kind,
        "a": fragment_a,
        "b": fragment_b,
    }))
}

// ------------------------------------------------------------------ watch

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum WatchAction {
    Add,
    Remove,
    Clear,
    List,
    Evaluate,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WatchArgs {
    action: WatchAction,
    session_id: Uuid,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    watch_id: Option<Uuid>,
}

async fn watch_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: WatchArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;
    let dump_id = guard.session.current_dump_id.clone().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;

    match args.action {
        WatchAction::Add => {
            let expression = require(args.expression, "expression")?;
            let watch = ctx.watches.add(user_id, &dump_id, expression, args.description).await?;
            ctx.reports.invalidate(user_id, &dump_id).await;
            Ok(json!(watch))
        }
        WatchAction::Remove => {
            let watch_id = require(args.watch_id, "watch_id")?;
            let removed = ctx.watches.remove(user_id, &dump_id, watch_id).await?;
            if removed {
                ctx.reports.invalidate(user_id, &dump_id).await;
            }
            Ok(json!({ "removed": removed }))
        }
        WatchAction::Clear => {
            ctx.watches.clear(user_id, &dump_id).await?;
            ctx.reports.invalidate(user_id, &dump_id).await;
            Ok(json!({ "cleared": true }))
        }
        WatchAction::List => Ok(json!({ "watches": ctx.watches.list(user_id, &dump_id).await? })),
        WatchAction::Evaluate => {
            let watches: Vec<Watch> = ctx.watches.list(user_id, &dump_id).await?;
            let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
            let mut results = Vec::with_capacity(watches.len());
            for watch in &watches {
                let outcome = debugger.execute(&watch.expression).await;
                let result = match outcome {
                    Ok(raw) => crate::watch::evaluate(watch, |_expr| async { Ok(raw) }).await,
                    Err(e) => crate::watch::evaluate(watch, |_expr| async { Err(e) }).await,
                };
                results.push(result);
            }
            Ok(json!({ "results": results }))
        }
    }
}

// ---------------------------------------------------------------- symbols

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum SymbolsAction {
    Configure,
    List,
    Clear,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SymbolsArgs {
    action: SymbolsAction,
    session_id: Uuid,
    #[serde(default)]
    extra_paths: Vec<String>,
    #[serde(default = "default_debugger_kind")]
    debugger_kind: String,
}

fn default_debugger_kind() -> String {
    "lldb".to_string()
}

async fn symbols_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: SymbolsArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;
    let dump_id = guard.session.current_dump_id.clone().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;

    match args.action {
        SymbolsAction::Configure => {
            let path = ctx.symbols.build_debugger_path(user_id, &dump_id, &args.extra_paths, &args.debugger_kind);
            let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
            debugger.configure_symbol_path(&path).await?;
            guard.session.extra_symbol_paths = args.extra_paths;
            drop(guard);
            ctx.sessions.persist(args.session_id).await?;
            // A symbol-path change can change source-line resolution for
            // frames already in a cached report (§9 Open Question iii).
            ctx.reports.invalidate(user_id, &dump_id).await;
            Ok(json!({ "configured": true, "path": path }))
        }
        SymbolsAction::List => {
            let layers = ctx.symbols.configure(user_id, &dump_id, &args.extra_paths);
            Ok(json!({ "layers": layers.iter().map(|l| format!("{l:?}")).collect::<Vec<_>>() }))
        }
        SymbolsAction::Clear => {
            ctx.symbols.clear_dump_cache(user_id, &dump_id).await?;
            if let Some(debugger) = guard.debugger.as_mut() {
                debugger.clear_command_cache();
            }
            drop(guard);
            ctx.reports.invalidate(user_id, &dump_id).await;
            Ok(json!({ "cleared": true }))
        }
    }
}

// ------------------------------------------------------------ source_link

#[derive(Debug, Deserialize, JsonSchema)]
struct SourceLinkArgs {
    session_id: Uuid,
    module: String,
    method: String,
    il_offset: u32,
}

async fn source_link_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: SourceLinkArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let guard = entry.lock().await;
    let reader = guard.managed_reader.as_ref().ok_or(DumpsrvError::RequiresManagedRuntime)?;
    let location = reader.sequence_points_for_frame(&args.module, &args.method, args.il_offset).await?;
    Ok(json!({ "location": location }))
}

// ---------------------------------------------------------------- inspect

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum InspectKind {
    Modules,
    Threads,
    Heap,
    Type,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InspectArgs {
    session_id: Uuid,
    kind: InspectKind,
    #[serde(default)]
    address: Option<String>,
}

async fn inspect_tool(ctx: &ToolContext, user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: InspectArgs = parse_args(args)?;
    let entry = ctx.sessions.acquire(args.session_id, user_id).await?;
    let mut guard = entry.lock().await;

    match args.kind {
        InspectKind::Modules => {
            let debugger = guard.debugger.as_mut().ok_or_else(|| DumpsrvError::Preconditioned("no dump open for this session".into()))?;
            Ok(json!({ "modules": debugger.execute("lm").await? }))
        }
        InspectKind::Threads => {
            let reader = guard.managed_reader.as_ref().ok_or(DumpsrvError::RequiresManagedRuntime)?;
            Ok(json!({ "threads": reader.threads().await? }))
        }
        InspectKind::Heap => {
            let reader = guard.managed_reader.as_ref().ok_or(DumpsrvError::RequiresManagedRuntime)?;
            Ok(json!({ "heap": reader.heap_stats().await? }))
        }
        InspectKind::Type => {
            let reader = guard.managed_reader.as_ref().ok_or(DumpsrvError::RequiresManagedRuntime)?;
            let address_str = require(args.address, "address")?;
            let address = u64::from_str_radix(address_str.trim_start_matches("0x"), 16).map_err(|_| invalid(format!("'{address_str}' is not a hex address")))?;
            Ok(json!({ "type": reader.type_by_method_table(address).await? }))
        }
    }
}

// --------------------------------------------------------- datadog_symbols

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum DatadogSymbolsAction {
    Status,
    Enable,
    Disable,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DatadogSymbolsArgs {
    action: DatadogSymbolsAction,
}

/// Datadog-extracted symbol layer availability is a process-wide,
/// restart-only toggle (`Config::datadog_trace_symbols_enabled`); this
/// tool only reports it. `enable`/`disable` fail `Preconditioned` rather
/// than silently no-op, so a caller doesn't mistake a read for a write.
async fn datadog_symbols_tool(ctx: &ToolContext, _user_id: &str, args: Value) -> Result<Value, DumpsrvError> {
    let args: DatadogSymbolsArgs = parse_args(args)?;
    match args.action {
        DatadogSymbolsAction::Status => Ok(json!({ "enabled": ctx.config.datadog_trace_symbols_enabled })),
        DatadogSymbolsAction::Enable | DatadogSymbolsAction::Disable => Err(DumpsrvError::Preconditioned(
            "datadog_trace_symbols_enabled is a process-wide setting and can only be changed via configuration and a restart".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::debugger::FakeDebuggerBackend;
    use crate::managed_reader::FakeManagedReaderBackend;

    fn test_context(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            config: Arc::new(Config::default()),
            sessions: Arc::new(SessionManager::new(dir, 5, Duration::from_secs(1800))),
            dumps: Arc::new(DumpStore::new(dir)),
            reports: Arc::new(ReportStore::new(dir)),
            watches: Arc::new(WatchStore::new(dir)),
            symbols: Arc::new(SymbolPolicy::new(dir, dir.join("_global_symbols"))),
            analyzers: Arc::new(AnalyzerRegistry::new()),
            debugger_backend_factory: Arc::new(|| {
                Box::new(FakeDebuggerBackend {
                    module_list: vec!["libcoreclr.so".into()],
                    ..Default::default()
                })
            }),
            managed_reader_backend_factory: Arc::new(|| Box::new(FakeManagedReaderBackend { available: true, ..Default::default() })),
            sampling_for_session: Arc::new(|_session_id| None),
        }
    }

    async fn call(ctx: &ToolContext, user_id: &str, name: &str, arguments: Value) -> Value {
        let result = dispatch(
            ctx,
            user_id,
            CallToolRequestParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await;
        assert_ne!(result.is_error, Some(true), "tool call failed: {result:?}");
        let dumpsrv_mcp_types::CallToolResultContent::Text(text) = &result.content[0];
        serde_json::from_str(&text.text).unwrap()
    }

    #[tokio::test]
    async fn session_create_then_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let created = call(&ctx, "u1", "session", json!({"action": "create"})).await;
        let session_id = created["sessionId"].as_str().unwrap();
        let closed = call(&ctx, "u1", "session", json!({"action": "close", "session_id": session_id})).await;
        assert_eq!(closed["closed"], json!(true));
    }

    #[tokio::test]
    async fn dump_upload_open_exec_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let session = call(&ctx, "u1", "session", json!({"action": "create"})).await;
        let session_id = session["sessionId"].as_str().unwrap().to_string();

        let data_base64 = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(b"fake dump")
        };
        let dump = call(&ctx, "u1", "dump", json!({"action": "upload", "data_base64": data_base64})).await;
        let dump_id = dump["dumpId"].as_str().unwrap().to_string();

        let opened = call(&ctx, "u1", "dump", json!({"action": "open", "session_id": session_id, "dump_id": dump_id})).await;
        assert_eq!(opened["isDotnet"], json!(true));

        let exec_result = call(&ctx, "u1", "exec", json!({"session_id": session_id, "command": "k"})).await;
        assert!(exec_result["output"].is_string());

        let report = call(&ctx, "u1", "report", json!({"session_id": session_id})).await;
        assert!(report["analysis"]["crash"].is_object());

        let cached_again = call(&ctx, "u1", "report", json!({"session_id": session_id})).await;
        assert_eq!(report["metadata"]["generatedAt"], cached_again["metadata"]["generatedAt"]);
    }

    #[tokio::test]
    async fn watch_add_invalidates_cached_report() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let session = call(&ctx, "u1", "session", json!({"action": "create"})).await;
        let session_id = session["sessionId"].as_str().unwrap().to_string();
        let data_base64 = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(b"fake dump")
        };
        let dump = call(&ctx, "u1", "dump", json!({"action": "upload", "data_base64": data_base64})).await;
        let dump_id = dump["dumpId"].as_str().unwrap().to_string();
        call(&ctx, "u1", "dump", json!({"action": "open", "session_id": session_id, "dump_id": dump_id})).await;

        let first_report = call(&ctx, "u1", "report", json!({"session_id": session_id})).await;
        call(&ctx, "u1", "watch", json!({"action": "add", "session_id": session_id, "expression": "*(int*)0x1234"})).await;
        let second_report = call(&ctx, "u1", "report", json!({"session_id": session_id})).await;

        assert_ne!(first_report["metadata"]["generatedAt"], second_report["metadata"]["generatedAt"]);
    }

    #[tokio::test]
    async fn unknown_tool_name_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let result = dispatch(
            &ctx,
            "u1",
            CallToolRequestParams {
                name: "does_not_exist".to_string(),
                arguments: json!({}),
            },
        )
        .await;
        assert_eq!(result.is_error, Some(true));
    }
}
