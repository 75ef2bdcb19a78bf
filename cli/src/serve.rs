//! `dumpsrv serve` (§4.O): loads configuration the same way
//! `dumpsrv-mcp-server`'s own `main.rs` does, then hands off to
//! `dumpsrv_mcp_server::run_main`, which owns the axum server, the idle
//! sweep task, and graceful shutdown.

use std::path::PathBuf;

use clap::Parser;
use dumpsrv_core::Config;
use dumpsrv_core::ConfigOverrides;

#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// Path to a `dumpsrv.toml` config file. Defaults to the
    /// platform config directory (§6).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Overrides `bind_addr` from config/env/defaults.
    #[arg(long = "bind")]
    pub bind: Option<String>,

    /// Overrides `storage_dir` from config/env/defaults.
    #[arg(long = "storage-dir")]
    pub storage_dir: Option<PathBuf>,
}

pub async fn run(cmd: ServeCommand) -> anyhow::Result<()> {
    let overrides = ConfigOverrides { storage_dir: cmd.storage_dir, bind_addr: cmd.bind };
    let config = Config::load(cmd.config.as_deref(), overrides)?;
    dumpsrv_mcp_server::run_main(config).await
}
