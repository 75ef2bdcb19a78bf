//! AI sampling orchestrator (§4.I "analyze(kind=ai)"): a bounded,
//! iterative tool-call loop driven by server-initiated
//! `sampling/createMessage` requests, building an evidence ledger as it
//! goes and finishing with two single-shot rewriting passes.
//!
//! Transport (how a `sampling/createMessage` request actually reaches a
//! connected client and how its response comes back) is the
//! [`SamplingClient`] trait's problem, implemented by `dumpsrv-server`
//! against its SSE hub. Everything in this module only knows about that
//! one async call.

use async_trait::async_trait;
use dumpsrv_mcp_types::CreateMessageParams;
use dumpsrv_mcp_types::CreateMessageResult;
use dumpsrv_mcp_types::SamplingContent;
use dumpsrv_mcp_types::SamplingMessage;
use dumpsrv_mcp_types::SamplingRole;
use dumpsrv_protocol::AnalysisFragment;
use dumpsrv_protocol::Checkpoint;
use dumpsrv_protocol::DumpsrvError;
use dumpsrv_protocol::EvidenceEntry;
use dumpsrv_protocol::EvidenceLedger;
use dumpsrv_protocol::ReportSnapshot;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::debugger::DebuggerInstance;
use crate::managed_reader::ManagedReader;

/// Bumped whenever the tool palette offered to the model changes shape;
/// folded into `ReportOptions::llm_key` alongside the model name and
/// checkpoint cadence so a cached AI report is never served for a
/// different tool surface (§9 Open Question ii).
pub const TOOL_PALETTE_VERSION: &str = "ai-tools-v2";

/// The client-facing half of the server-initiated sampling back-channel.
/// `dumpsrv-server` implements this against its per-session SSE stream
/// and pending-request table; tests can substitute a scripted fake.
#[async_trait]
pub trait SamplingClient: Send + Sync {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, DumpsrvError>;
}

#[derive(Debug, Clone)]
pub struct AiLoopConfig {
    pub max_iterations: u32,
    pub checkpoint_every: u32,
    pub max_tokens: u32,
    pub evidence_excerpt_max_chars: usize,
    /// Checkpoint confidence (`0.0..=1.0`) at or above which the loop
    /// stops early even without a `done` action.
    pub confidence_threshold: f32,
    /// Total accumulated `EvidenceLedger::total_excerpt_bytes` at which
    /// the loop stops early (§4.I step 5's "ledger exceeds evidence
    /// budget" termination condition).
    pub evidence_budget_bytes: usize,
}

impl From<&crate::config::Config> for AiLoopConfig {
    fn from(cfg: &crate::config::Config) -> Self {
        Self {
            max_iterations: cfg.ai_max_iterations,
            checkpoint_every: cfg.ai_checkpoint_every.max(1),
            max_tokens: cfg.ai_max_tokens,
            evidence_excerpt_max_chars: cfg.ai_evidence_excerpt_max_chars,
            confidence_threshold: 0.85,
            evidence_budget_bytes: cfg.ai_evidence_budget_bytes,
        }
    }
}

/// The one JSON shape a model response must parse into. Anything else
/// is treated as a malformed turn and ends the loop early with whatever
/// evidence has already been collected, rather than retrying forever.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ModelAction {
    ToolCall {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    Checkpoint {
        hypothesis: String,
        #[serde(default)]
        open_questions: Vec<String>,
        confidence: f32,
    },
    Done {
        summary: serde_json::Value,
        #[serde(default)]
        threads: Option<serde_json::Value>,
    },
}

/// Runs the bounded tool-call loop for one `analyze(kind="ai")` call.
/// `ledger` is reset in place whenever it was accumulated against a
/// different `(dumpId, reportGeneratedAt)` pair (§8 evidence reset
/// invariant); callers persist `ledger` after this returns regardless of
/// outcome so partial progress survives a later retry.
pub async fn run_ai_loop(
    sampling: &dyn SamplingClient,
    model: &str,
    debugger: &mut DebuggerInstance,
    managed_reader: Option<&ManagedReader>,
    report: &ReportSnapshot,
    ledger: &mut EvidenceLedger,
    cancellation: &CancellationToken,
    cfg: &AiLoopConfig,
) -> Result<AnalysisFragment, DumpsrvError> {
    ledger.reset_if_stale(&report.metadata.dump_id, report.metadata.generated_at);

    let mut iteration = 0u32;
    let mut iterations_since_checkpoint = 0u32;
    let mut draft_summary: Option<serde_json::Value> = None;
    let mut draft_threads: Option<serde_json::Value> = None;
    let mut stopped_early = false;

    while iteration < cfg.max_iterations {
        if cancellation.is_cancelled() {
            return Err(DumpsrvError::Cancelled);
        }

        let checkpoint_due = iterations_since_checkpoint >= cfg.checkpoint_every;
        let prompt = build_prompt(report, ledger, cfg.evidence_excerpt_max_chars, checkpoint_due);
        let params = CreateMessageParams {
            messages: vec![SamplingMessage {
                role: SamplingRole::User,
                content: SamplingContent::Text { text: prompt },
            }],
            system_prompt: Some(system_prompt()),
            max_tokens: cfg.max_tokens,
            tools: Some(tool_palette()),
        };

        let result = sampling.create_message(params).await?;
        let SamplingContent::Text { text } = result.content;

        let action: ModelAction = match serde_json::from_str(&text) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, model, "ai loop: model turn did not parse as a known action, stopping");
                stopped_early = true;
                break;
            }
        };

        match action {
            ModelAction::ToolCall { tool, args } => {
                let outcome = execute_tool(&tool, &args, debugger, managed_reader, report).await;
                let excerpt = match &outcome {
                    Ok(text) => text.clone(),
                    Err(e) => e.to_string(),
                };
                ledger.push(EvidenceEntry::new(iteration, &tool, &args, &excerpt, cfg.evidence_excerpt_max_chars));
                iteration += 1;
                iterations_since_checkpoint += 1;
                if ledger.total_excerpt_bytes() >= cfg.evidence_budget_bytes {
                    tracing::info!(model, bytes = ledger.total_excerpt_bytes(), "ai loop: evidence budget exceeded, stopping");
                    stopped_early = true;
                    break;
                }
            }
            ModelAction::Checkpoint {
                hypothesis,
                open_questions,
                confidence,
            } => {
                let reached_threshold = confidence >= cfg.confidence_threshold;
                ledger.checkpoint = Some(Checkpoint {
                    hypothesis,
                    open_questions,
                    confidence,
                });
                iteration += 1;
                iterations_since_checkpoint = 0;
                if reached_threshold {
                    break;
                }
            }
            ModelAction::Done { summary, threads } => {
                draft_summary = Some(summary);
                draft_threads = threads;
                iteration += 1;
                break;
            }
        }
    }

    if iteration >= cfg.max_iterations && draft_summary.is_none() {
        tracing::info!(model, iterations = iteration, "ai loop: iteration budget exhausted without a done action");
    }

    let final_summary = rewrite_summary(sampling, report, ledger, draft_summary, cfg.max_tokens).await;
    let final_threads = rewrite_threads(sampling, ledger, draft_threads, cfg.max_tokens).await;

    Ok(AnalysisFragment {
        ai_analysis: Some(json!({
            "model": model,
            "iterations": iteration,
            "evidenceEntries": ledger.entries.len(),
            "checkpoint": ledger.checkpoint,
            "stoppedEarly": stopped_early,
        })),
        summary: Some(final_summary),
        threads: final_threads,
        ..Default::default()
    })
}

fn system_prompt() -> String {
    "You are an automated .NET crash dump analyst. Every reply must be exactly one JSON object, no prose: \
     {\"action\":\"tool_call\",\"tool\":<name>,\"args\":{...}} to call one of the offered tools; \
     {\"action\":\"checkpoint\",\"hypothesis\":<string>,\"open_questions\":[<string>,...],\"confidence\":<0..1>} \
     to record progress without calling a tool; or \
     {\"action\":\"done\",\"summary\":{...},\"threads\":{...}} once you have enough evidence to conclude."
        .to_string()
}

/// The six-tool palette named in SPEC_FULL.md §4.I step 2: a raw
/// debugger escape hatch, a module listing, a managed-type lookup, and
/// three ways to pull the structural report piecemeal (`report_get` is
/// the paginated dot-path reader; `find_report_sections`/
/// `get_report_section` let the model search the index by substring and
/// then fetch a whole section once it knows the exact path).
fn tool_palette() -> serde_json::Value {
    json!([
        {"name": "exec", "description": "run a raw debugger command", "args": {"command": "string"}},
        {"name": "list_modules", "description": "list loaded native/managed modules"},
        {"name": "inspect_object", "description": "resolve the managed type at a method table address", "args": {"address": "hex string"}},
        {
            "name": "report_get",
            "description": "read a dot-path field out of the structural report (analysis.threads.all[3].frames-style paths); arrays are paginated",
            "args": {"path": "string", "limit": "number, optional", "cursor": "string, optional"},
        },
        {"name": "find_report_sections", "description": "search the report index for paths whose name contains a substring", "args": {"query": "string"}},
        {"name": "get_report_section", "description": "fetch one whole section of the report by exact dot-path, unpaginated", "args": {"path": "string"}},
    ])
}

/// One entry of the flat `(path, sizeBytes)` index the prompt carries
/// instead of the full report (§4.I step 1: "the full report is never
/// inlined"). `path` is rooted at `analysis` so it lines up with the
/// dot-paths `report_get`/`get_report_section` accept.
fn report_index(analysis: &AnalysisFragment) -> Vec<(String, usize)> {
    let root = serde_json::to_value(analysis).unwrap_or(serde_json::Value::Null);
    let mut out = Vec::new();
    index_node(&root, "analysis", 0, 2, &mut out);
    out
}

/// Recurses into objects up to `max_depth`; for arrays it records the
/// array's own size plus one representative element (`path[0]`) rather
/// than every element, so a report with thousands of frames still
/// produces a bounded index — the model pages through the rest with
/// `report_get`'s `limit`/`cursor`.
fn index_node(value: &serde_json::Value, path: &str, depth: usize, max_depth: usize, out: &mut Vec<(String, usize)>) {
    let size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
    out.push((path.to_string(), size));
    if depth >= max_depth {
        return;
    }
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                index_node(child, &format!("{path}.{key}"), depth + 1, max_depth, out);
            }
        }
        serde_json::Value::Array(items) => {
            if let Some(first) = items.first() {
                index_node(first, &format!("{path}[0]"), depth + 1, max_depth, out);
            }
        }
        _ => {}
    }
}

/// `checkpoint_due` drives the server-side cadence from §4.I step 4:
/// once `checkpointEveryIterations` have passed since the last recorded
/// checkpoint, the prompt carries an explicit directive asking the
/// model for one this turn, rather than waiting for it to volunteer.
fn build_prompt(report: &ReportSnapshot, ledger: &EvidenceLedger, excerpt_budget: usize, checkpoint_due: bool) -> String {
    let index_text = report_index(&report.analysis)
        .into_iter()
        .map(|(path, size)| format!("{path} ({size} bytes)"))
        .collect::<Vec<_>>()
        .join("\n");
    let checkpoint = ledger
        .checkpoint
        .as_ref()
        .map(|c| format!("Last checkpoint (confidence {:.2}): {}", c.confidence, c.hypothesis))
        .unwrap_or_else(|| "No checkpoint recorded yet.".to_string());
    let directive = if checkpoint_due {
        "It is time for a checkpoint: reply with {\"action\":\"checkpoint\",...} summarizing your hypothesis, open questions, and confidence before doing anything else.\n\n"
    } else {
        ""
    };
    format!(
        "{directive}Report index (paths and sizes; fetch contents with report_get/find_report_sections/get_report_section):\n{index_text}\n\n{checkpoint}\n\nEvidence collected so far:\n{}",
        ledger.excerpt_text(excerpt_budget.max(1))
    )
}

async fn execute_tool(
    name: &str,
    args: &serde_json::Value,
    debugger: &mut DebuggerInstance,
    managed_reader: Option<&ManagedReader>,
    report: &ReportSnapshot,
) -> Result<String, DumpsrvError> {
    match name {
        "exec" => {
            let command = args
                .get("command")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DumpsrvError::InvalidArgument("exec requires a command string".into()))?;
            debugger.execute(command).await
        }
        "list_modules" => debugger.execute("lm").await,
        "inspect_object" => {
            let reader = managed_reader.ok_or(DumpsrvError::RequiresManagedRuntime)?;
            let address_str = args
                .get("address")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DumpsrvError::InvalidArgument("inspect_object requires an address".into()))?;
            let address = u64::from_str_radix(address_str.trim_start_matches("0x"), 16)
                .map_err(|_| DumpsrvError::InvalidArgument(format!("'{address_str}' is not a hex address")))?;
            let ty = reader.type_by_method_table(address).await?;
            Ok(ty.unwrap_or_else(|| "<unknown type>".to_string()))
        }
        "report_get" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
            let limit = args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
            let cursor = args.get("cursor").and_then(|v| v.as_str());
            let root = report_root(report);
            let value = resolve_report_path(&root, path).unwrap_or(serde_json::Value::Null);
            Ok(paginate(value, limit, cursor).to_string())
        }
        "find_report_sections" => {
            let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("").to_lowercase();
            let sections: Vec<_> = report_index(&report.analysis)
                .into_iter()
                .filter(|(path, _)| query.is_empty() || path.to_lowercase().contains(&query))
                .map(|(path, size)| json!({"path": path, "sizeBytes": size}))
                .collect();
            Ok(json!({ "sections": sections }).to_string())
        }
        "get_report_section" => {
            let path = args
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DumpsrvError::InvalidArgument("get_report_section requires a path".into()))?;
            let root = report_root(report);
            Ok(resolve_report_path(&root, path).unwrap_or(serde_json::Value::Null).to_string())
        }
        other => Err(DumpsrvError::InvalidArgument(format!("unknown AI tool '{other}'"))),
    }
}

/// Root value dot-paths are resolved against; wrapping `analysis` under
/// its own key keeps `report_get`/`get_report_section` paths
/// (`analysis.threads.all[3].frames`) identical to the ones the index
/// advertises.
fn report_root(report: &ReportSnapshot) -> serde_json::Value {
    json!({ "analysis": report.analysis })
}

enum PathSegment {
    Key(String),
    Index(usize),
}

/// Tokenizes a dot-path with optional trailing `[n]` index suffixes
/// (`threads.all[3].frames`) into a flat segment list.
fn tokenize_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let mut rest = part;
        if let Some(bracket) = rest.find('[') {
            let key = &rest[..bracket];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            rest = &rest[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(end) = stripped.find(']') else { break };
                if let Ok(index) = stripped[..end].parse::<usize>() {
                    segments.push(PathSegment::Index(index));
                }
                rest = &stripped[end + 1..];
            }
        } else {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    segments
}

fn resolve_report_path(root: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    tokenize_path(path).into_iter().try_fold(root.clone(), |acc, segment| match segment {
        PathSegment::Key(key) => acc.get(key.as_str()).cloned(),
        PathSegment::Index(index) => acc.get(index).cloned(),
    })
}

/// Applies `report_get`'s `limit`/`cursor` pager to an array value;
/// non-array values pass through unchanged since pagination only makes
/// sense over a list. `cursor` is the stringified start offset returned
/// as `nextCursor` by the previous page, so concatenating every page in
/// order reproduces the full array (§8 "round-trips" pagination
/// property).
fn paginate(value: serde_json::Value, limit: Option<usize>, cursor: Option<&str>) -> serde_json::Value {
    match value {
        serde_json::Value::Array(items) => {
            let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0).min(items.len());
            let take = limit.unwrap_or(items.len()).max(1);
            let end = start.saturating_add(take).min(items.len());
            let page = items[start..end].to_vec();
            let next_cursor = if end < items.len() { Some(end.to_string()) } else { None };
            json!({ "items": page, "total": items.len(), "nextCursor": next_cursor })
        }
        other => other,
    }
}

async fn single_shot(sampling: &dyn SamplingClient, instruction: &str, source: &serde_json::Value, max_tokens: u32) -> Option<serde_json::Value> {
    let prompt = format!("{instruction}\n\n{source}");
    let params = CreateMessageParams {
        messages: vec![SamplingMessage {
            role: SamplingRole::User,
            content: SamplingContent::Text { text: prompt },
        }],
        system_prompt: None,
        max_tokens,
        tools: None,
    };
    match sampling.create_message(params).await {
        Ok(result) => {
            let SamplingContent::Text { text } = result.content;
            Some(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "description": text })))
        }
        Err(e) => {
            tracing::warn!(error = %e, "ai loop: rewrite pass failed, keeping draft");
            None
        }
    }
}

/// Final single-shot pass turning the loop's draft summary (or, if the
/// loop never reached `done`, the evidence ledger alone) into prose.
/// Best-effort: a failure here falls back to the draft rather than
/// failing the whole `analyze` call.
async fn rewrite_summary(
    sampling: &dyn SamplingClient,
    report: &ReportSnapshot,
    ledger: &EvidenceLedger,
    draft: Option<serde_json::Value>,
    max_tokens: u32,
) -> serde_json::Value {
    let source = draft.clone().unwrap_or_else(|| {
        json!({
            "report": report.analysis,
            "evidence": ledger.excerpt_text(ledger.entries.len()),
        })
    });
    single_shot(sampling, "Rewrite this into a concise prose summary with a \"description\" field and a \"recommendations\" array.", &source, max_tokens)
        .await
        .or(draft)
        .unwrap_or(source)
}

/// Companion rewrite pass for the thread-level narrative, only run when
/// the loop produced (or was given) thread evidence to rewrite.
async fn rewrite_threads(sampling: &dyn SamplingClient, ledger: &EvidenceLedger, draft: Option<serde_json::Value>, max_tokens: u32) -> Option<serde_json::Value> {
    let draft = draft?;
    let rewritten = single_shot(
        sampling,
        "Rewrite this thread analysis into a short per-thread narrative, preserving any thread ids present.",
        &draft,
        max_tokens,
    )
    .await;
    let _ = &ledger.dump_id;
    Some(rewritten.unwrap_or(draft))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use dumpsrv_protocol::AnalysisFragment;
    use dumpsrv_protocol::ReportOptions;

    use crate::debugger::FakeDebuggerBackend;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SamplingClient for ScriptedClient {
        async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, DumpsrvError> {
            if let SamplingMessage {
                content: SamplingContent::Text { text },
                ..
            } = &params.messages[0]
            {
                self.prompts.lock().expect("prompts mutex poisoned").push(text.clone());
            }
            let mut responses = self.responses.lock().expect("responses mutex poisoned");
            let text = if responses.is_empty() {
                "{}".to_string()
            } else {
                responses.remove(0)
            };
            Ok(CreateMessageResult {
                role: SamplingRole::Assistant,
                content: SamplingContent::Text { text },
                model: "test-model".to_string(),
                stop_reason: "end_turn".to_string(),
            })
        }
    }

    fn report() -> ReportSnapshot {
        ReportSnapshot::new("u1", "d1", ReportOptions::default(), AnalysisFragment::default())
    }

    fn cfg() -> AiLoopConfig {
        AiLoopConfig {
            max_iterations: 10,
            checkpoint_every: 2,
            max_tokens: 512,
            evidence_excerpt_max_chars: 200,
            confidence_threshold: 0.85,
            evidence_budget_bytes: 20_000,
        }
    }

    #[tokio::test]
    async fn tool_call_then_done_builds_evidence_and_summary() {
        let client = ScriptedClient::new(vec![
            r#"{"action":"tool_call","tool":"list_modules","args":{}}"#.to_string(),
            r#"{"action":"done","summary":{"description":"looks fine"},"threads":null}"#.to_string(),
            r#"{"description":"looks fine, rewritten"}"#.to_string(),
        ]);
        let backend = FakeDebuggerBackend {
            module_list: vec!["libcoreclr.so".into()],
            ..Default::default()
        };
        let mut debugger = DebuggerInstance::new(Box::new(backend), Duration::from_secs(5));
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let mut ledger = EvidenceLedger::new("d1");
        let cancellation = CancellationToken::new();

        let fragment = run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &cfg()).await.unwrap();

        assert_eq!(ledger.entries.len(), 1);
        assert!(fragment.ai_analysis.is_some());
        assert!(fragment.summary.is_some());
    }

    #[tokio::test]
    async fn checkpoint_above_threshold_stops_loop_early() {
        let client = ScriptedClient::new(vec![
            r#"{"action":"checkpoint","hypothesis":"null ref in Foo.Bar","open_questions":[],"confidence":0.95}"#.to_string(),
            r#"{"description":"summary"}"#.to_string(),
        ]);
        let backend = FakeDebuggerBackend::default();
        let mut debugger = DebuggerInstance::new(Box::new(backend), Duration::from_secs(5));
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let mut ledger = EvidenceLedger::new("d1");
        let cancellation = CancellationToken::new();

        let fragment = run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &cfg()).await.unwrap();

        assert_eq!(ledger.checkpoint.as_ref().unwrap().confidence, 0.95);
        assert!(fragment.ai_analysis.is_some());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_first_call() {
        let client = ScriptedClient::new(vec![]);
        let backend = FakeDebuggerBackend::default();
        let mut debugger = DebuggerInstance::new(Box::new(backend), Duration::from_secs(5));
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let mut ledger = EvidenceLedger::new("d1");
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let err = run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &cfg()).await.unwrap_err();
        assert!(matches!(err, DumpsrvError::Cancelled));
    }

    #[tokio::test]
    async fn evidence_ledger_resets_when_report_identity_changes() {
        let mut ledger = EvidenceLedger::new("other-dump");
        ledger.push(EvidenceEntry::new(0, "exec", &json!({}), "stale", 50));
        let client = ScriptedClient::new(vec![r#"{"action":"done","summary":{"description":"ok"}}"#.to_string(), r#"{"description":"ok"}"#.to_string()]);
        let backend = FakeDebuggerBackend::default();
        let mut debugger = DebuggerInstance::new(Box::new(backend), Duration::from_secs(5));
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let cancellation = CancellationToken::new();

        run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &cfg()).await.unwrap();
        assert_eq!(ledger.dump_id, "d1");
    }

    fn report_with_threads(ids: &[u32]) -> ReportSnapshot {
        let all: Vec<_> = ids.iter().map(|id| json!({"id": id})).collect();
        let analysis = AnalysisFragment {
            threads: Some(json!({ "all": all })),
            ..Default::default()
        };
        ReportSnapshot::new("u1", "d1", ReportOptions::default(), analysis)
    }

    fn fake_debugger() -> DebuggerInstance {
        DebuggerInstance::new(Box::new(FakeDebuggerBackend::default()), Duration::from_secs(5))
    }

    #[test]
    fn build_prompt_never_inlines_the_full_report() {
        let report = report_with_threads(&[0, 1, 2]);
        let ledger = EvidenceLedger::new("d1");
        let prompt = build_prompt(&report, &ledger, 200, false);
        // The index names the path and its size; it must not contain the
        // serialized thread payload itself.
        assert!(prompt.contains("analysis.threads"));
        assert!(!prompt.contains("\"id\":0"));
    }

    #[test]
    fn build_prompt_carries_a_checkpoint_directive_when_due() {
        let report = report_with_threads(&[0]);
        let ledger = EvidenceLedger::new("d1");
        let prompt = build_prompt(&report, &ledger, 200, true);
        assert!(prompt.contains("\"action\":\"checkpoint\""));
    }

    #[tokio::test]
    async fn report_get_paginates_and_pages_concatenate_to_the_full_array() {
        let report = report_with_threads(&[0, 1, 2, 3, 4]);
        let mut debugger = fake_debugger();

        let page1 = execute_tool(
            "report_get",
            &json!({"path": "analysis.threads.all", "limit": 2}),
            &mut debugger,
            None,
            &report,
        )
        .await
        .unwrap();
        let page1: serde_json::Value = serde_json::from_str(&page1).unwrap();
        assert_eq!(page1["items"], json!([{"id": 0}, {"id": 1}]));
        assert_eq!(page1["nextCursor"], json!("2"));

        let page2 = execute_tool(
            "report_get",
            &json!({"path": "analysis.threads.all", "limit": 2, "cursor": page1["nextCursor"].as_str().unwrap()}),
            &mut debugger,
            None,
            &report,
        )
        .await
        .unwrap();
        let page2: serde_json::Value = serde_json::from_str(&page2).unwrap();
        assert_eq!(page2["items"], json!([{"id": 2}, {"id": 3}]));
        assert_eq!(page2["nextCursor"], json!("4"));

        let page3 = execute_tool(
            "report_get",
            &json!({"path": "analysis.threads.all", "limit": 2, "cursor": page2["nextCursor"].as_str().unwrap()}),
            &mut debugger,
            None,
            &report,
        )
        .await
        .unwrap();
        let page3: serde_json::Value = serde_json::from_str(&page3).unwrap();
        assert_eq!(page3["items"], json!([{"id": 4}]));
        assert!(page3["nextCursor"].is_null());
    }

    #[tokio::test]
    async fn report_get_resolves_bracket_indices() {
        let report = report_with_threads(&[7, 8]);
        let mut debugger = fake_debugger();
        let result = execute_tool("report_get", &json!({"path": "analysis.threads.all[1].id"}), &mut debugger, None, &report)
            .await
            .unwrap();
        assert_eq!(result, "8");
    }

    #[tokio::test]
    async fn find_report_sections_matches_by_substring() {
        let report = report_with_threads(&[0]);
        let mut debugger = fake_debugger();
        let result = execute_tool("find_report_sections", &json!({"query": "threads"}), &mut debugger, None, &report)
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&result).unwrap();
        let sections = result["sections"].as_array().unwrap();
        assert!(sections.iter().any(|s| s["path"] == "analysis.threads"));
    }

    #[tokio::test]
    async fn get_report_section_returns_the_whole_unpaginated_subtree() {
        let report = report_with_threads(&[1, 2]);
        let mut debugger = fake_debugger();
        let result = execute_tool("get_report_section", &json!({"path": "analysis.threads"}), &mut debugger, None, &report)
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(result["all"], json!([{"id": 1}, {"id": 2}]));
    }

    #[tokio::test]
    async fn inspect_object_resolves_a_managed_type() {
        use crate::managed_reader::FakeManagedReaderBackend;
        use crate::managed_reader::ManagedReader;

        let mut backend = FakeManagedReaderBackend {
            available: true,
            ..Default::default()
        };
        backend.method_tables.insert(0x1234, "MyApp.Widget".to_string());
        let reader = ManagedReader::new(Box::new(backend));
        let mut debugger = fake_debugger();
        let result = execute_tool("inspect_object", &json!({"address": "0x1234"}), &mut debugger, Some(&reader), &report())
            .await
            .unwrap();
        assert_eq!(result, "MyApp.Widget");
    }

    #[tokio::test]
    async fn a_model_turn_using_the_documented_palette_names_is_supported() {
        let client = ScriptedClient::new(vec![
            r#"{"action":"tool_call","tool":"report_get","args":{"path":"analysis.threads"}}"#.to_string(),
            r#"{"action":"done","summary":{"description":"ok"}}"#.to_string(),
            r#"{"description":"ok"}"#.to_string(),
        ]);
        let mut debugger = fake_debugger();
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let mut ledger = EvidenceLedger::new("d1");
        let cancellation = CancellationToken::new();

        let fragment = run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &cfg())
            .await
            .unwrap();

        assert_eq!(ledger.entries.len(), 1);
        assert_eq!(ledger.entries[0].tool_name, "report_get");
        assert!(fragment.ai_analysis.is_some());
    }

    #[tokio::test]
    async fn loop_proactively_requests_a_checkpoint_on_the_configured_cadence() {
        // checkpoint_every=2: two tool calls make the cadence due, the
        // prompt for the third turn must carry the checkpoint directive.
        let client = ScriptedClient::new(vec![
            r#"{"action":"tool_call","tool":"list_modules","args":{}}"#.to_string(),
            r#"{"action":"tool_call","tool":"list_modules","args":{}}"#.to_string(),
            r#"{"action":"checkpoint","hypothesis":"h","open_questions":[],"confidence":0.2}"#.to_string(),
            r#"{"action":"done","summary":{"description":"ok"}}"#.to_string(),
            r#"{"description":"ok"}"#.to_string(),
        ]);
        let mut debugger = fake_debugger();
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let mut ledger = EvidenceLedger::new("d1");
        let cancellation = CancellationToken::new();

        run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &cfg())
            .await
            .unwrap();

        // 4 main-loop turns plus the trailing single-shot summary-rewrite
        // prompt, which is not subject to the checkpoint cadence.
        let prompts = client.prompts.lock().expect("prompts mutex poisoned");
        assert_eq!(prompts.len(), 5);
        assert!(!prompts[0].contains("\"action\":\"checkpoint\""));
        assert!(!prompts[1].contains("\"action\":\"checkpoint\""));
        assert!(prompts[2].contains("\"action\":\"checkpoint\""));
        assert!(!prompts[3].contains("\"action\":\"checkpoint\""), "cadence resets after a checkpoint is recorded");
    }

    #[tokio::test]
    async fn loop_stops_when_the_evidence_ledger_exceeds_its_byte_budget() {
        let client = ScriptedClient::new(vec![
            r#"{"action":"tool_call","tool":"list_modules","args":{}}"#.to_string(),
            r#"{"action":"tool_call","tool":"list_modules","args":{}}"#.to_string(),
            r#"{"action":"tool_call","tool":"list_modules","args":{}}"#.to_string(),
            r#"{"description":"ok"}"#.to_string(),
        ]);
        let backend = FakeDebuggerBackend {
            module_list: vec!["x".repeat(50)],
            ..Default::default()
        };
        let mut debugger = DebuggerInstance::new(Box::new(backend), Duration::from_secs(5));
        debugger.open_dump("dump.dmp", None).await.unwrap();
        let mut ledger = EvidenceLedger::new("d1");
        let cancellation = CancellationToken::new();
        let mut tight_cfg = cfg();
        tight_cfg.checkpoint_every = 100;
        tight_cfg.evidence_budget_bytes = 80;

        let fragment = run_ai_loop(&client, "test-model", &mut debugger, None, &report(), &mut ledger, &cancellation, &tight_cfg)
            .await
            .unwrap();

        // Budget is exceeded after the second tool call (2 * 50 bytes);
        // the loop must not reach the scripted third tool call.
        assert_eq!(ledger.entries.len(), 2);
        let ai_analysis = fragment.ai_analysis.expect("ai_analysis present");
        assert_eq!(ai_analysis["stoppedEarly"], json!(true));
    }
}
