//! `dumpsrv` binary (§4.O): a thin `clap` multitool mirroring the
//! teacher's `MultitoolCli` (`cli/src/main.rs`) — each subcommand is a
//! struct living in its own module, dispatched from one `main`, with all
//! the real work delegated to `dumpsrv-core`/`dumpsrv-mcp-server`/
//! `dumpsrv-client` rather than living in the CLI crate itself.

mod probe;
mod serve;

use clap::Parser;
use clap::Subcommand;

pub use probe::ProbeCommand;
pub use serve::ServeCommand;

#[derive(Debug, Parser)]
#[command(name = "dumpsrv", version, about = "Remote .NET crash-dump analysis service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP+SSE JSON-RPC server (§4.F/N).
    Serve(ServeCommand),
    /// Connect to a running server, perform the MCP handshake, and print
    /// its advertised tools (§4.G) — a smoke test for a deployment.
    Probe(ProbeCommand),
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(cmd) => serve::run(cmd).await,
        Command::Probe(cmd) => probe::run(cmd).await,
    }
}
