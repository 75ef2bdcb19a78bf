//! Domain model for the crash-dump analysis service.
//!
//! This crate holds the wire-independent entities described by the data
//! model: sessions, dumps, report snapshots, the evidence ledger and
//! watches, plus the error taxonomy every other crate in the workspace
//! propagates. Nothing here knows about JSON-RPC, HTTP, or SSE framing —
//! that lives in `dumpsrv-mcp-types` and `dumpsrv-server`/`dumpsrv-client`.

pub mod dump;
pub mod error;
pub mod evidence;
pub mod report;
pub mod session;
pub mod watch;

pub use dump::Dump;
pub use dump::DumpMetadata;
pub use error::DumpsrvError;
pub use error::Result;
pub use evidence::Checkpoint;
pub use evidence::EvidenceEntry;
pub use evidence::EvidenceLedger;
pub use report::AnalysisFragment;
pub use report::AnalyzerKind;
pub use report::ReportOptions;
pub use report::ReportSnapshot;
pub use session::DebuggerState;
pub use session::Session;
pub use session::SessionHeader;
pub use watch::Watch;
pub use watch::WatchResult;
pub use watch::WatchValueKind;
