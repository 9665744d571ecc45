//! Per-session options and the initial prompt.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::control::hooks::HookMatcher;
use crate::control::permission::CanUseTool;
use crate::mcp::McpServer;
use crate::protocol::codec::MAX_LINE_BYTES;
use crate::protocol::envelope::HookEvent;

/// Callback receiving each agent stderr line.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Default grace period between `SIGTERM` and `SIGKILL` on close.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Everything a session needs besides the process launch settings.
#[derive(Clone)]
pub struct SessionOptions {
    /// Permission callback; every tool use is allowed when absent.
    pub can_use_tool: Option<CanUseTool>,
    /// Hooks keyed by event.
    pub hooks: BTreeMap<HookEvent, Vec<HookMatcher>>,
    /// In-process MCP servers keyed by name.
    pub mcp_servers: BTreeMap<String, Arc<dyn McpServer>>,
    /// Cancelling this token interrupts the agent. Cancelled before start,
    /// it yields a closed session and no process.
    pub abort: Option<CancellationToken>,
    /// Receives agent stderr lines.
    pub on_stderr: Option<StderrCallback>,
    /// Extra fields merged into the `initialize` request.
    pub initialize_extra: Map<String, Value>,
    /// Grace period for the agent to exit on close.
    pub close_grace: Duration,
    /// Longest accepted output line in bytes.
    pub max_line_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            can_use_tool: None,
            hooks: BTreeMap::new(),
            mcp_servers: BTreeMap::new(),
            abort: None,
            on_stderr: None,
            initialize_extra: Map::new(),
            close_grace: DEFAULT_CLOSE_GRACE,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("hooks", &self.hooks)
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .field("abort", &self.abort)
            .field("on_stderr", &self.on_stderr.is_some())
            .field("initialize_extra", &self.initialize_extra)
            .field("close_grace", &self.close_grace)
            .field("max_line_bytes", &self.max_line_bytes)
            .finish()
    }
}

impl SessionOptions {
    /// Set the permission callback.
    #[must_use]
    pub fn with_can_use_tool(mut self, callback: CanUseTool) -> Self {
        self.can_use_tool = Some(callback);
        self
    }

    /// Add a hook matcher for `event`.
    #[must_use]
    pub fn with_hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hooks.entry(event).or_default().push(matcher);
        self
    }

    /// Register an in-process MCP server under `name`.
    #[must_use]
    pub fn with_mcp_server(mut self, name: impl Into<String>, server: Arc<dyn McpServer>) -> Self {
        self.mcp_servers.insert(name.into(), server);
        self
    }

    /// Set the abort token.
    #[must_use]
    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    /// Set the stderr callback.
    #[must_use]
    pub fn with_on_stderr(mut self, callback: StderrCallback) -> Self {
        self.on_stderr = Some(callback);
        self
    }

    /// Merge `key` into the `initialize` request.
    #[must_use]
    pub fn with_initialize_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initialize_extra.insert(key.into(), value);
        self
    }

    /// Whether the agent may send control requests that need answering
    /// after the user input ends.
    pub(crate) fn expects_control_requests(&self) -> bool {
        self.can_use_tool.is_some() || !self.hooks.is_empty() || !self.mcp_servers.is_empty()
    }
}

/// Session input.
pub enum Prompt {
    /// One user message; the input side closes after the first `result`.
    Text(String),
    /// Caller-driven stream of raw input lines; the session stays multi-turn.
    Stream(BoxStream<'static, Value>),
}

impl Prompt {
    /// Whether this is a single-turn prompt.
    #[must_use]
    pub fn is_single_turn(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}
