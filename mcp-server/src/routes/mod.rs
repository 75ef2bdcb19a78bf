//! One module per route group, merged into the full router in `lib.rs`
//! (§4.F/G, §6). Kept thin: parse the transport shape, call into
//! `dumpsrv-core`/`crate::hub`, map the result back to HTTP.

pub mod dumps;
pub mod mcp;
pub mod misc;
pub mod symbols;
