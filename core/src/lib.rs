//! Session, debugger, and analysis orchestration for the crash-dump
//! analysis service. Everything here is transport-agnostic: HTTP/SSE
//! framing lives in `dumpsrv-server`/`dumpsrv-client`, wire shapes in
//! `dumpsrv-mcp-types`.

pub mod ai;
pub mod analyzers;
pub mod config;
pub mod debugger;
pub mod dumps;
pub mod managed_reader;
pub mod report_store;
pub mod session;
pub mod storage;
pub mod symbols;
pub mod tools;
pub mod watch;

pub use config::Config;
pub use config::ConfigOverrides;
pub use session::SessionManager;
