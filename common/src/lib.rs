//! Small utilities shared by `dumpsrv-cli` and, where a human-readable
//! duration is useful, `dumpsrv-server`. Kept independent of
//! `dumpsrv-core` so a CLI-only dependency never pulls in the full
//! session/debugger stack.

pub mod elapsed;
