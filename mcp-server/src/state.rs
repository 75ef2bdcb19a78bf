//! Process-wide state assembly (§4.N). Every handler takes `State<Arc<AppState>>`
//! rather than reaching through a global, the way the teacher threads an
//! explicit `Arc<Mutex<...>>`/channel set through its own connection
//! handling instead of statics.

use std::sync::Arc;

use dumpsrv_core::Config;
use dumpsrv_core::SessionManager;
use dumpsrv_core::ai::SamplingClient;
use dumpsrv_core::analyzers::AnalyzerRegistry;
use dumpsrv_core::debugger::FakeDebuggerBackend;
use dumpsrv_core::debugger::ProcessDebuggerBackend;
use dumpsrv_core::dumps::DumpStore;
use dumpsrv_core::managed_reader::FakeManagedReaderBackend;
use dumpsrv_core::report_store::ReportStore;
use dumpsrv_core::symbols::SymbolPolicy;
use dumpsrv_core::tools::ToolContext;
use dumpsrv_core::watch::WatchStore;
use uuid::Uuid;

use crate::hub::SseHub;

pub struct AppState {
    pub config: Arc<Config>,
    pub tools: ToolContext,
    pub hub: Arc<SseHub>,
}

/// Assembles every store under one `storage_dir`, the way the tool
/// dispatcher's own test helper does (`core::tools::tests::test_context`),
/// and wires `sampling_for_session` back into the hub so a tool running
/// the AI loop can reach whichever SSE connection is currently driving
/// that debugger session.
pub async fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let config = Arc::new(config);
    let hub = Arc::new(SseHub::new());
    let storage_dir = config.storage_dir.clone();
    let global_symbols_dir = storage_dir.join("_global_symbols");

    let hub_for_sampling = hub.clone();
    let sampling_for_session: Arc<dyn Fn(Uuid) -> Option<Arc<dyn SamplingClient>> + Send + Sync> =
        Arc::new(move |session_id: Uuid| {
            let hub = hub_for_sampling.clone();
            // `connection_for_session` is async; `sampling_for_session` is a
            // synchronous lookup closure (§4.G), so a blocking handle is used
            // to bridge the hub's async RwLock without making every call site
            // in `core::tools` async-aware of the transport layer.
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move {
                    hub.connection_for_session(session_id)
                        .await
                        .map(|connection| connection as Arc<dyn SamplingClient>)
                })
            })
        });

    let tools = ToolContext {
        config: config.clone(),
        sessions: Arc::new(SessionManager::new(
            storage_dir.clone(),
            config.session_quota_per_user,
            config.session_idle_timeout,
        )),
        dumps: Arc::new(DumpStore::new(storage_dir.clone())),
        reports: Arc::new(ReportStore::new(storage_dir.clone())),
        watches: Arc::new(WatchStore::new(storage_dir.clone())),
        symbols: Arc::new(SymbolPolicy::new(storage_dir.clone(), global_symbols_dir)),
        analyzers: Arc::new(AnalyzerRegistry::new()),
        debugger_backend_factory: Arc::new(|| Box::new(ProcessDebuggerBackend::new("cdb", "0:000>"))),
        managed_reader_backend_factory: Arc::new(|| Box::new(FakeManagedReaderBackend::default())),
        sampling_for_session,
    };

    Ok(Arc::new(AppState { config, tools, hub }))
}
