use dumpsrv_core::Config;
use dumpsrv_core::ConfigOverrides;
use dumpsrv_mcp_server::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(None, ConfigOverrides::default())?;
    run_main(config).await
}
