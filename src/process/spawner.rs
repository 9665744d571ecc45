//! Agent process spawner.
//!
//! Launches the agent with piped stdio and hands back an [`AgentTransport`].
//! The child itself is owned by a monitor task; callers talk to it through
//! the cloneable [`AgentProcess`] handle:
//! - `terminate()` delivers `SIGTERM` on unix (a hard kill elsewhere),
//! - `kill()` force-kills,
//! - `wait()` / `exit_info()` observe the exit status the monitor publishes.
//!
//! When every handle is dropped the monitor kills the child, matching
//! `kill_on_drop` semantics.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::resolve::resolve_program;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables passed through when `inherit_env` is off.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Variable carrying the session id into the agent's environment.
pub const SESSION_ID_ENV: &str = "CONDUIT_SESSION_ID";

/// Flags that put the agent into NDJSON streaming mode.
pub const DEFAULT_PROTOCOL_ARGS: &[&str] = &[
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
    "--verbose",
];

/// Flag/value pairs every launch must carry.
const REQUIRED_FLAGS: &[(&str, &str)] = &[
    ("--output-format", "stream-json"),
    ("--input-format", "stream-json"),
];

// ── Configuration ────────────────────────────────────────────────────────────

/// How to launch one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Binary name or path.
    pub program: String,
    /// Caller arguments, placed after the protocol flags.
    pub args: Vec<String>,
    /// NDJSON mode flags.
    pub protocol_args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Keep the parent environment; otherwise only [`ALLOWED_ENV_VARS`].
    pub inherit_env: bool,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
}

impl SpawnConfig {
    /// Config for `program` with default protocol flags and no extras.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            protocol_args: DEFAULT_PROTOCOL_ARGS.iter().map(|s| (*s).to_owned()).collect(),
            cwd: None,
            inherit_env: true,
            env: BTreeMap::new(),
        }
    }

    /// Full argument vector: protocol flags, any missing required flag, then
    /// caller arguments.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut out = self.protocol_args.clone();
        for (flag, value) in REQUIRED_FLAGS {
            let present = self
                .protocol_args
                .iter()
                .chain(&self.args)
                .any(|arg| arg == flag);
            if !present {
                out.push((*flag).to_owned());
                out.push((*value).to_owned());
            }
        }
        out.extend(self.args.iter().cloned());
        out
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// Boxed writable half of an agent connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Boxed readable half of an agent connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte streams of one agent, plus the process handle when there is one.
pub struct AgentTransport {
    /// Agent input.
    pub stdin: BoxedWriter,
    /// Agent NDJSON output.
    pub stdout: BoxedReader,
    /// Agent diagnostics.
    pub stderr: Option<BoxedReader>,
    /// Process handle; `None` for in-memory transports.
    pub process: Option<AgentProcess>,
}

impl fmt::Debug for AgentTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTransport")
            .field("stderr", &self.stderr.is_some())
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

impl AgentTransport {
    /// Transport over arbitrary streams, with no process behind them.
    pub fn from_streams<W, R>(stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: None,
            process: None,
        }
    }

    /// Attach a stderr stream.
    #[must_use]
    pub fn with_stderr<R>(mut self, stderr: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.stderr = Some(Box::new(stderr));
        self
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// How the agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    /// Terminating signal number (unix).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Whether the process exited with code zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Terminate,
    Kill,
}

/// Cloneable handle to a running agent process.
#[derive(Debug, Clone)]
pub struct AgentProcess {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<StopSignal>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl AgentProcess {
    /// OS process id, if the child was still running when spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, once published.
    #[must_use]
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    /// Wait for the process to exit.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.exit.clone();
        let unknown = ExitInfo {
            code: None,
            signal: None,
        };
        let published = rx.wait_for(Option::is_some).await.map(|info| *info);
        match published {
            Ok(info) => info.unwrap_or(unknown),
            Err(_) => self.exit_info().unwrap_or(unknown),
        }
    }

    /// Ask the process to stop (`SIGTERM` on unix).
    pub fn terminate(&self) {
        let _ = self.control.send(StopSignal::Terminate);
    }

    /// Force-kill the process.
    pub fn kill(&self) {
        let _ = self.control.send(StopSignal::Kill);
    }

    /// Terminate, wait up to `grace`, then kill.
    pub async fn shutdown(&self, grace: Duration) -> ExitInfo {
        if let Some(info) = self.exit_info() {
            return info;
        }
        self.terminate();
        if let Ok(info) = tokio::time::timeout(grace, self.wait()).await {
            return info;
        }
        debug!(pid = ?self.pid, "process: grace period elapsed, killing");
        self.kill();
        self.wait().await
    }
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn the agent described by `config` for `session_id`.
///
/// The binary is resolved first; the child gets piped stdio,
/// `kill_on_drop(true)`, and [`SESSION_ID_ENV`] in its environment.
///
/// # Errors
///
/// - `AppError::Spawn` if the binary cannot be resolved or started.
pub fn spawn_agent(config: &SpawnConfig, session_id: &str) -> Result<AgentTransport> {
    let program = resolve_program(&config.program)?;
    let mut cmd = Command::new(&program);
    cmd.args(config.command_args());

    if !config.inherit_env {
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd.envs(&config.env);
    cmd.env(SESSION_ID_ENV, session_id);

    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child.stderr.take();

    let pid = child.id();
    info!(session_id, pid = ?pid, program = %program.display(), "process: agent spawned");

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(monitor(session_id.to_owned(), child, control_rx, exit_tx));

    Ok(AgentTransport {
        stdin: Box::new(stdin),
        stdout: Box::new(stdout),
        stderr: stderr.map(|s| Box::new(s) as BoxedReader),
        process: Some(AgentProcess {
            pid,
            control: control_tx,
            exit: exit_rx,
        }),
    })
}

async fn monitor(
    session_id: String,
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<StopSignal>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let status = loop {
        let signal = tokio::select! {
            status = child.wait() => break status,
            signal = control.recv() => signal,
        };
        match signal {
            Some(StopSignal::Terminate) => send_terminate(&mut child, &session_id),
            Some(StopSignal::Kill) => force_kill(&mut child, &session_id),
            None => {
                debug!(session_id = %session_id, "process: all handles dropped, killing agent");
                force_kill(&mut child, &session_id);
                break child.wait().await;
            }
        }
    };

    let info = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(err) => {
            warn!(session_id = %session_id, %err, "process: error waiting for agent");
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    };
    info!(session_id = %session_id, code = ?info.code, signal = ?info.signal, "process: agent exited");
    exit_tx.send_replace(Some(info));
}

fn force_kill(child: &mut Child, session_id: &str) {
    if let Err(err) = child.start_kill() {
        debug!(session_id, %err, "process: kill failed");
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, session_id: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(session_id, %err, "process: SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, session_id: &str) {
    force_kill(child, session_id);
}
