use clap::Parser;
use dumpsrv_cli::Cli;
use dumpsrv_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_main(Cli::parse()).await
}
