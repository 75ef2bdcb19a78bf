//! Wire types for the JSON-RPC 2.0 + MCP-flavored protocol carried over
//! HTTP POST and SSE (§4.F/G, §6).
//!
//! This crate only defines *shapes*; framing (HTTP status codes, SSE
//! `data:` line concatenation) lives in `dumpsrv-server`/`dumpsrv-client`.

pub mod jsonrpc;
pub mod sampling;
pub mod tool;

pub use jsonrpc::JSONRPC_VERSION;
pub use jsonrpc::JSONRPCError;
pub use jsonrpc::JSONRPCErrorError;
pub use jsonrpc::JSONRPCMessage;
pub use jsonrpc::JSONRPCNotification;
pub use jsonrpc::JSONRPCRequest;
pub use jsonrpc::JSONRPCResponse;
pub use jsonrpc::RequestId;
pub use jsonrpc::error_codes;
pub use sampling::CreateMessageParams;
pub use sampling::CreateMessageResult;
pub use sampling::SamplingCapability;
pub use sampling::SamplingContent;
pub use sampling::SamplingMessage;
pub use sampling::SamplingRole;
pub use tool::CallToolRequestParams;
pub use tool::CallToolResult;
pub use tool::CallToolResultContent;
pub use tool::ClientCapabilities;
pub use tool::Implementation;
pub use tool::InitializeParams;
pub use tool::InitializeResult;
pub use tool::ListToolsResult;
pub use tool::ServerCapabilities;
pub use tool::TextContent;
pub use tool::Tool;

/// Protocol version this crate implements (§6).
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
