//! Session controller.
//!
//! A [`Session`] owns one agent connection end to end: it starts the read
//! loop, performs the `initialize` handshake, writes the initial input,
//! answers the agent's control requests, and exposes the caller surface
//! (message iteration, control commands, initialisation metadata, close).
//!
//! Closing is exactly-once. Whichever comes first (the agent's output
//! ending, the process exiting, or [`Session::close`]) completes the message
//! queue and rejects every pending control request; later calls are no-ops.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metadata::{self, AccountInfo, ModelInfo, OutputStyles, SlashCommand};
use super::options::{Prompt, SessionOptions, StderrCallback};
use super::queue::MessageQueue;
use crate::control::correlator::{Correlator, PendingResponse};
use crate::control::dispatcher::Dispatcher;
use crate::control::hooks::HookRegistry;
use crate::mcp::McpBridge;
use crate::process::spawner::{spawn_agent, AgentProcess, AgentTransport, BoxedReader, ExitInfo};
use crate::process::SpawnConfig;
use crate::protocol::codec::NdjsonCodec;
use crate::protocol::envelope::{
    user_message, ControlCommand, ControlResponse, InitializeRequest, Outbound, PermissionMode,
};
use crate::protocol::router::{LineRouter, LineSink};
use crate::protocol::writer::{self, run_writer, OutboundHandle};
use crate::{AppError, Result};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Being wired up; not yet reading.
    Pending,
    /// Reading output and accepting commands.
    Running,
    /// Terminal.
    Closed,
}

struct SessionInner {
    session_id: String,
    state: Mutex<SessionState>,
    closing: AtomicBool,
    finished: AtomicBool,
    single_turn: bool,
    expects_control: bool,
    close_grace: Duration,
    queue: MessageQueue<Value>,
    correlator: Correlator,
    dispatcher: Arc<Dispatcher>,
    outbound: OutboundHandle,
    router: LineRouter,
    process: Option<AgentProcess>,
    first_result: CancellationToken,
    shutdown: CancellationToken,
    router_done: Mutex<Option<oneshot::Sender<Option<AppError>>>>,
}

/// Handle to one running agent session. Cheap to clone.
///
/// Dropping the last clone without calling [`Session::close`] closes the
/// session in the background.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _owner: Arc<CloseOnDrop>,
}

/// Shared by every [`Session`] clone. Background tasks hold the inner state
/// but not this, so the last caller handle going away ends the session.
struct CloseOnDrop(Arc<SessionInner>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.0.closing.load(Ordering::SeqCst) {
            return;
        }
        debug!(session_id = %self.0.session_id, "session: last handle dropped, closing");
        let inner = Arc::clone(&self.0);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { inner.close().await });
            }
            Err(_) => inner.close_now(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .field("single_turn", &self.inner.single_turn)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the agent described by `spawn` and start a session over it.
    ///
    /// Must be called within a tokio runtime. When `options.abort` is already
    /// cancelled no process is spawned and the returned session is closed.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn` if the agent cannot be started.
    /// - `AppError::Mcp` if an in-process MCP server refuses to connect.
    /// - `AppError::Closed` if the agent's input closed before the handshake
    ///   could be written.
    pub fn start(
        spawn: &SpawnConfig,
        options: SessionOptions,
        prompt: impl Into<Prompt>,
    ) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        if is_aborted(&options) {
            return Ok(Self::aborted(session_id));
        }
        let transport = spawn_agent(spawn, &session_id)?;
        Self::launch(session_id, transport, options, prompt.into())
    }

    /// Start a session over an already connected transport.
    ///
    /// # Errors
    ///
    /// Same as [`Session::start`], minus spawn failures.
    pub fn start_with_transport(
        transport: AgentTransport,
        options: SessionOptions,
        prompt: impl Into<Prompt>,
    ) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        if is_aborted(&options) {
            return Ok(Self::aborted(session_id));
        }
        Self::launch(session_id, transport, options, prompt.into())
    }

    fn aborted(session_id: String) -> Self {
        let (outbound, _) = writer::channel(&session_id);
        let correlator = Correlator::new();
        let closed = AppError::Closed("session aborted before start".into());
        correlator.close(closed);
        let queue = MessageQueue::new();
        queue.complete(None);
        let router = LineRouter::new();
        router.close();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        info!(session_id = %session_id, "session: aborted before start, no process spawned");
        Self::own(Arc::new(SessionInner {
            dispatcher: Arc::new(Dispatcher::new(
                session_id.clone(),
                None,
                Arc::new(HookRegistry::new()),
                BTreeMap::new(),
            )),
            session_id,
            state: Mutex::new(SessionState::Closed),
            closing: AtomicBool::new(true),
            finished: AtomicBool::new(true),
            single_turn: false,
            expects_control: false,
            close_grace: Duration::ZERO,
            queue,
            correlator,
            outbound,
            router,
            process: None,
            first_result: CancellationToken::new(),
            shutdown,
            router_done: Mutex::new(None),
        }))
    }

    fn own(inner: Arc<SessionInner>) -> Self {
        Self {
            _owner: Arc::new(CloseOnDrop(Arc::clone(&inner))),
            inner,
        }
    }

    fn launch(
        session_id: String,
        transport: AgentTransport,
        options: SessionOptions,
        prompt: Prompt,
    ) -> Result<Self> {
        let AgentTransport {
            stdin,
            stdout,
            stderr,
            process,
        } = transport;

        let hooks = Arc::new(HookRegistry::new());
        let hook_config = hooks.register_matchers(&options.hooks);

        let mut bridges: BTreeMap<String, Arc<McpBridge>> = BTreeMap::new();
        for (name, server) in &options.mcp_servers {
            let bridge = Arc::new(McpBridge::new(name.clone(), Arc::clone(server)));
            if let Err(e) = bridge.connect() {
                for connected in bridges.values() {
                    connected.close();
                }
                return Err(e);
            }
            bridges.insert(name.clone(), bridge);
        }
        let server_names: Vec<String> = bridges.keys().cloned().collect();

        let dispatcher = Arc::new(Dispatcher::new(
            session_id.clone(),
            options.can_use_tool.clone(),
            hooks,
            bridges,
        ));
        let (outbound, writer_rx) = writer::channel(&session_id);
        let (done_tx, done_rx) = oneshot::channel();

        let inner = Arc::new(SessionInner {
            session_id: session_id.clone(),
            state: Mutex::new(SessionState::Pending),
            closing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            single_turn: prompt.is_single_turn(),
            expects_control: options.expects_control_requests(),
            close_grace: options.close_grace,
            queue: MessageQueue::new(),
            correlator: Correlator::new(),
            dispatcher,
            outbound,
            router: LineRouter::new(),
            process,
            first_result: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            router_done: Mutex::new(Some(done_tx)),
        });

        let writer_cancel = inner.shutdown.clone();
        let writer_id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = run_writer(writer_id.clone(), stdin, writer_rx, writer_cancel).await {
                debug!(session_id = %writer_id, error = %e, "session: writer stopped with error");
            }
        });

        inner.router.spawn(
            session_id.clone(),
            stdout,
            options.max_line_bytes,
            Arc::new(SessionSink(Arc::clone(&inner))),
        );

        if let Some(stderr) = stderr {
            tokio::spawn(drain_stderr(
                session_id.clone(),
                stderr,
                options.on_stderr.clone(),
                options.max_line_bytes,
                inner.shutdown.clone(),
            ));
        }

        let init = InitializeRequest {
            hooks: hook_config,
            sdk_mcp_servers: server_names,
            extra: options.initialize_extra.clone(),
        };
        if let Err(e) = send_initial(&inner, init, prompt) {
            inner.finish(Some(e.clone()));
            inner.shutdown.cancel();
            return Err(e);
        }

        tokio::spawn(supervise(Arc::clone(&inner), done_rx));

        if let Some(abort) = options.abort.clone() {
            let watcher = Arc::clone(&inner);
            tokio::spawn(async move {
                tokio::select! {
                    () = abort.cancelled() => {
                        info!(session_id = %watcher.session_id, "session: abort requested, interrupting agent");
                        if let Err(e) = watcher.fire(ControlCommand::Interrupt) {
                            debug!(session_id = %watcher.session_id, error = %e, "session: interrupt after abort not sent");
                        }
                    }
                    () = watcher.shutdown.cancelled() => {}
                }
            });
        }

        {
            let mut state = inner.lock_state();
            if *state == SessionState::Pending {
                *state = SessionState::Running;
            }
        }
        info!(session_id = %session_id, single_turn = inner.single_turn, "session: started");
        Ok(Self::own(inner))
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Next agent message in arrival order.
    ///
    /// `None` once the session ended cleanly and every message was
    /// delivered; `Some(Err(_))` when it ended with an error.
    pub async fn next_message(&self) -> Option<Result<Value>> {
        self.inner.queue.next().await
    }

    /// Messages as a stream; stops after the first error.
    #[must_use]
    pub fn messages(&self) -> BoxStream<'static, Result<Value>> {
        stream::unfold(Some(self.clone()), |state| async move {
            let Some(session) = state else {
                return None;
            };
            match session.inner.queue.next().await {
                Some(Ok(message)) => Some((Ok(message), Some(session))),
                Some(Err(e)) => Some((Err(e), None)),
                None => None,
            }
        })
        .boxed()
    }

    // ── Input ────────────────────────────────────────────────────────────────

    /// Write one more user turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the session or its input is closed.
    pub fn send_message(&self, text: &str) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.outbound.send_line(user_message(text))
    }

    /// Forward every value of `input` as one input line, then close the
    /// agent's input.
    ///
    /// When the session has a permission callback, hooks, or MCP servers,
    /// input stays open until the first `result` message so control
    /// responses can still be written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the session is closed.
    pub fn stream_input(&self, input: BoxStream<'static, Value>) -> Result<()> {
        self.inner.ensure_open()?;
        tokio::spawn(drain_input(Arc::clone(&self.inner), input));
        Ok(())
    }

    // ── Fire-and-forget commands ─────────────────────────────────────────────

    /// Stop the agent's current turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the session is closed.
    pub fn interrupt(&self) -> Result<()> {
        self.inner.fire(ControlCommand::Interrupt)
    }

    /// Change the permission mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the session is closed.
    pub fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.inner.fire(ControlCommand::SetPermissionMode { mode })
    }

    /// Change the model; `None` restores the default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the session is closed.
    pub fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.inner.fire(ControlCommand::SetModel {
            model: model.map(str::to_owned),
        })
    }

    /// Change the thinking budget; `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the session is closed.
    pub fn set_max_thinking_tokens(&self, tokens: Option<u64>) -> Result<()> {
        self.inner.fire(ControlCommand::SetMaxThinkingTokens {
            max_thinking_tokens: tokens,
        })
    }

    // ── Awaited commands ─────────────────────────────────────────────────────

    /// Status of every MCP server the agent knows about.
    ///
    /// # Errors
    ///
    /// - `AppError::Control` if the agent answers with an error.
    /// - `AppError::Closed` (or the session's terminal error) if the session
    ///   ends first.
    pub async fn mcp_server_status(&self) -> Result<Vec<Value>> {
        let response = self.inner.request(ControlCommand::McpStatus).await?;
        metadata::field(&response, "mcpServers")
    }

    /// Reconnect the MCP server `name`.
    ///
    /// # Errors
    ///
    /// As for [`Session::mcp_server_status`].
    pub async fn reconnect_mcp_server(&self, name: &str) -> Result<()> {
        self.inner
            .request(ControlCommand::McpReconnect {
                server_name: name.to_owned(),
            })
            .await
            .map(drop)
    }

    /// Enable or disable the MCP server `name`.
    ///
    /// # Errors
    ///
    /// As for [`Session::mcp_server_status`].
    pub async fn toggle_mcp_server(&self, name: &str, enabled: bool) -> Result<()> {
        self.inner
            .request(ControlCommand::McpToggle {
                server_name: name.to_owned(),
                enabled,
            })
            .await
            .map(drop)
    }

    /// Replace the agent's dynamic MCP server set; returns the agent's answer.
    ///
    /// # Errors
    ///
    /// As for [`Session::mcp_server_status`].
    pub async fn set_mcp_servers(&self, servers: Value) -> Result<Value> {
        self.inner
            .request(ControlCommand::McpSetServers { servers })
            .await
    }

    // ── Initialisation metadata ──────────────────────────────────────────────

    /// Full `initialize` response payload.
    ///
    /// # Errors
    ///
    /// - `AppError::Control` if the agent rejected the handshake.
    /// - The session's closure error if it ended before answering.
    pub async fn initialization_result(&self) -> Result<Value> {
        self.inner.correlator.init_result().await
    }

    /// Slash commands the agent supports.
    ///
    /// # Errors
    ///
    /// As for [`Session::initialization_result`], plus `AppError::Protocol`
    /// if the field is malformed.
    pub async fn supported_commands(&self) -> Result<Vec<SlashCommand>> {
        metadata::field(&self.initialization_result().await?, "commands")
    }

    /// Models the agent can switch to.
    ///
    /// # Errors
    ///
    /// As for [`Session::supported_commands`].
    pub async fn supported_models(&self) -> Result<Vec<ModelInfo>> {
        metadata::field(&self.initialization_result().await?, "models")
    }

    /// Account the agent is authenticated as.
    ///
    /// # Errors
    ///
    /// As for [`Session::supported_commands`].
    pub async fn account_info(&self) -> Result<AccountInfo> {
        metadata::field(&self.initialization_result().await?, "account")
    }

    /// Current and available output styles.
    ///
    /// # Errors
    ///
    /// As for [`Session::supported_commands`].
    pub async fn output_styles(&self) -> Result<OutputStyles> {
        metadata::output_styles(&self.initialization_result().await?)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Close the session.
    ///
    /// Closes the agent's input, stops reading, completes the message queue,
    /// rejects pending requests, and stops the process (`SIGTERM`, then
    /// `SIGKILL` after the close grace period). Idempotent.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.lock_state()
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Runtime-assigned session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Agent process id, when the session owns a process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.process.as_ref().and_then(AgentProcess::pid)
    }

    /// Agent exit status, once it has exited.
    #[must_use]
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.inner.process.as_ref().and_then(AgentProcess::exit_info)
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> AppError {
        AppError::Closed(format!("session '{}' is closed", self.session_id))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) || self.closing.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        Ok(())
    }

    /// The one outbound send path. Registers a slot first when `awaited`.
    fn send(&self, command: ControlCommand, awaited: bool) -> Result<Option<PendingResponse>> {
        self.ensure_open()?;

        let request_id = self.correlator.next_id();
        let slot = if awaited {
            Some(self.correlator.register(&request_id)?)
        } else {
            None
        };

        let subtype = command.subtype();
        let envelope = Outbound::ControlRequest {
            request_id: request_id.clone(),
            request: command,
        };
        if let Err(e) = self.outbound.send(&envelope) {
            self.correlator.forget(&request_id);
            return Err(e);
        }
        debug!(session_id = %self.session_id, request_id = %request_id, subtype, awaited, "session: control request sent");
        Ok(slot)
    }

    fn fire(&self, command: ControlCommand) -> Result<()> {
        self.send(command, false).map(drop)
    }

    async fn request(&self, command: ControlCommand) -> Result<Value> {
        let Some(slot) = self.send(command, true)? else {
            return Err(self.closed_error());
        };
        slot.await.unwrap_or_else(|_| Err(self.closed_error()))
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.session_id, "session: closing");
        self.outbound.close_input();
        self.finish(None);
        if let Some(process) = &self.process {
            let exit = process.shutdown(self.close_grace).await;
            debug!(session_id = %self.session_id, code = ?exit.code, signal = ?exit.signal, "session: agent stopped");
        }
        self.shutdown.cancel();
    }

    /// Close without waiting; the process is killed outright.
    fn close_now(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound.close_input();
        self.finish(None);
        if let Some(process) = &self.process {
            process.kill();
        }
        self.shutdown.cancel();
    }

    /// Run the close sequence once; later calls do nothing.
    fn finish(&self, error: Option<AppError>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.lock_state() = SessionState::Closed;
        self.router.close();

        let closure = error.clone().unwrap_or_else(|| self.closed_error());
        let rejected = self.correlator.close(closure);
        self.queue.complete(error.clone());
        self.dispatcher.close();
        self.first_result.cancel();

        match &error {
            Some(e) => warn!(session_id = %self.session_id, error = %e, rejected, "session: ended with error"),
            None => info!(session_id = %self.session_id, rejected, "session: ended"),
        }
    }

    fn exit_error(&self, exit: ExitInfo) -> Option<AppError> {
        if self.closing.load(Ordering::SeqCst) {
            return None;
        }
        match exit.code {
            Some(code) if code != 0 => Some(AppError::Transport(format!(
                "agent process exited with code {code}"
            ))),
            _ => None,
        }
    }
}

// ── Router sink ──────────────────────────────────────────────────────────────

struct SessionSink(Arc<SessionInner>);

impl LineSink for SessionSink {
    fn on_control_request(&self, request_id: String, request: Value) {
        let inner = Arc::clone(&self.0);
        tokio::spawn(async move {
            let response = inner.dispatcher.dispatch(request_id, request).await;
            let request_id = response.request_id().to_owned();
            if let Err(e) = inner.outbound.send(&Outbound::ControlResponse { response }) {
                debug!(session_id = %inner.session_id, request_id = %request_id, error = %e, "session: control response not written");
            }
        });
    }

    fn on_control_response(&self, response: ControlResponse) {
        self.0.correlator.resolve(response);
    }

    fn on_control_cancel(&self, request_id: String) {
        self.0.dispatcher.cancel(&request_id);
    }

    fn on_message(&self, message: Value) {
        let is_result = message.get("type").and_then(Value::as_str) == Some("result");
        self.0.queue.push(message);
        if is_result {
            self.0.first_result.cancel();
            if self.0.single_turn {
                debug!(session_id = %self.0.session_id, "session: result received, closing single-turn input");
                self.0.outbound.close_input();
            }
        }
    }

    fn on_done(&self, error: Option<AppError>) {
        let tx = self
            .0
            .router_done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(error);
        }
    }
}

// ── Startup ──────────────────────────────────────────────────────────────────

/// Write the handshake, then the initial input.
fn send_initial(inner: &Arc<SessionInner>, init: InitializeRequest, prompt: Prompt) -> Result<()> {
    let init_id = inner.correlator.next_id();
    inner.correlator.begin_init(&init_id)?;
    inner.outbound.send(&Outbound::ControlRequest {
        request_id: init_id,
        request: ControlCommand::Initialize(init),
    })?;

    match prompt {
        Prompt::Text(text) => inner.outbound.send_line(user_message(&text))?,
        Prompt::Stream(input) => {
            tokio::spawn(drain_input(Arc::clone(inner), input));
        }
    }
    Ok(())
}

// ── Background tasks ─────────────────────────────────────────────────────────

/// Wait for the agent's output to end and its process to exit, then finish.
///
/// Each event waits at most the close grace period for the other.
async fn supervise(inner: Arc<SessionInner>, mut done_rx: oneshot::Receiver<Option<AppError>>) {
    let grace = inner.close_grace;
    let error = match &inner.process {
        None => (&mut done_rx).await.unwrap_or(None),
        Some(process) => {
            tokio::select! {
                outcome = &mut done_rx => {
                    let read_error = outcome.unwrap_or(None);
                    let exit = tokio::time::timeout(grace, process.wait()).await.ok();
                    read_error.or_else(|| exit.and_then(|info| inner.exit_error(info)))
                }
                exit = process.wait() => {
                    let read_error = tokio::time::timeout(grace, &mut done_rx)
                        .await
                        .ok()
                        .and_then(std::result::Result::ok)
                        .flatten();
                    inner.exit_error(exit).or(read_error)
                }
            }
        }
    };
    inner.finish(error);
    inner.shutdown.cancel();
}

async fn drain_input(inner: Arc<SessionInner>, mut input: BoxStream<'static, Value>) {
    loop {
        let next = tokio::select! {
            () = inner.shutdown.cancelled() => return,
            next = input.next() => next,
        };
        let Some(line) = next else { break };
        if let Err(e) = inner.outbound.send_line(line) {
            debug!(session_id = %inner.session_id, error = %e, "session: input stream stopped");
            return;
        }
    }

    if inner.expects_control {
        tokio::select! {
            () = inner.first_result.cancelled() => {}
            () = inner.shutdown.cancelled() => return,
        }
    }
    debug!(session_id = %inner.session_id, "session: input stream ended, closing agent input");
    inner.outbound.close_input();
}

async fn drain_stderr(
    session_id: String,
    stderr: BoxedReader,
    callback: Option<StderrCallback>,
    max_line_bytes: usize,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(stderr, NdjsonCodec::with_max_length(max_line_bytes));
    let mut resuming = false;
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = lines.next() => item,
        };
        match item {
            None if resuming => resuming = false,
            None => break,
            Some(Ok(line)) => {
                resuming = false;
                debug!(session_id = %session_id, line = %line, "session: agent stderr");
                if let Some(callback) = &callback {
                    callback(&line);
                }
            }
            Some(Err(AppError::Protocol(_))) => resuming = true,
            Some(Err(e)) => {
                debug!(session_id = %session_id, error = %e, "session: stderr read failed");
                break;
            }
        }
    }
}

fn is_aborted(options: &SessionOptions) -> bool {
    options
        .abort
        .as_ref()
        .is_some_and(CancellationToken::is_cancelled)
}
