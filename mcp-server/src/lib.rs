//! HTTP+SSE JSON-RPC transport for the crash-dump analysis service
//! (§4.F/G). Everything session/debugger/report related lives in
//! `dumpsrv-core`; this crate owns framing only — axum routes, the SSE
//! hub that turns a connected client into a [`dumpsrv_core::ai::SamplingClient`],
//! and the small REST surface (`/api/dumps/*`, `/api/symbols/*`,
//! `/api/server/capabilities`, `/health`, `/info`) that sits alongside
//! the JSON-RPC channel.

mod auth;
mod error;
mod hub;
mod jsonrpc;
mod routes;
mod state;

pub use state::AppState;
pub use state::build_state;

use std::net::SocketAddr;

use dumpsrv_core::Config;

/// Builds the full `axum::Router` (ambient bootstrap, §4.N): every
/// handler receives `Arc<AppState>` through its function signature, no
/// `lazy_static`/`OnceCell` global (§9 redesign flag).
pub fn router(state: std::sync::Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .merge(routes::mcp::routes())
        .merge(routes::dumps::routes())
        .merge(routes::symbols::routes())
        .merge(routes::misc::routes())
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Loads `config`, builds [`AppState`], and serves until the process
/// receives SIGTERM/Ctrl-C. Mirrors the teacher's `run_main` in
/// `mcp-server/src/lib.rs`: a thin bootstrap function a CLI binary calls
/// into, with the actual request handling kept out of `main.rs`.
pub async fn run_main(config: Config) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(Config::log_filter()))
        .with_writer(std::io::stderr)
        .init();

    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let state = build_state(config).await?;
    let app = router(state.clone());

    spawn_idle_sweep(state.clone());

    tracing::info!(%bind_addr, "dumpsrv-mcp-server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Background eviction sweep (§4.D): periodically closes sessions idle
/// past `Config.session_idle_timeout`, the same way an explicit `close`
/// would. Runs for the lifetime of the process; dropped on shutdown
/// along with every other task `run_main` owns.
fn spawn_idle_sweep(state: std::sync::Arc<AppState>) {
    let period = (state.config.session_idle_timeout / 4).max(std::time::Duration::from_secs(30));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let closed = state.tools.sessions.sweep_idle().await;
            if !closed.is_empty() {
                tracing::info!(count = closed.len(), "idle sweep closed sessions");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
