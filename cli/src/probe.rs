//! `dumpsrv probe`: a smoke test for a running deployment — connects,
//! performs the handshake, and prints `tools/list`. Never declares
//! `sampling` capability: it plays client, not model backend.

use clap::Parser;
use dumpsrv_client::McpClient;
use dumpsrv_mcp_types::Implementation;

#[derive(Debug, Parser)]
pub struct ProbeCommand {
    /// Base URL of a running server, e.g. `http://127.0.0.1:4714`.
    pub url: String,

    /// Also invoke this tool by name once the handshake completes.
    #[arg(long = "call")]
    pub call: Option<String>,

    /// JSON arguments for `--call`, e.g. `{"action":"create","user_id":"u1"}`.
    #[arg(long = "args", default_value = "{}")]
    pub args: String,
}

pub async fn run(cmd: ProbeCommand) -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();
    let client_info = Implementation { name: "dumpsrv-probe".to_string(), version: env!("CARGO_PKG_VERSION").to_string() };
    let client = McpClient::connect(cmd.url, client_info, None).await?;

    let tools = client.list_tools().await?;
    println!("connected; {} tool(s) available:", tools.tools.len());
    for tool in &tools.tools {
        println!("  {} — {}", tool.name, tool.description.as_deref().unwrap_or(""));
    }

    if let Some(name) = cmd.call {
        let arguments: serde_json::Value = serde_json::from_str(&cmd.args)?;
        let result = client.call_tool(name, arguments).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
