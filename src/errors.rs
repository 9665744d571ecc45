//! Error types shared across the runtime.

use std::fmt::{Display, Formatter};

/// Shared runtime result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Runtime error enumeration covering every session failure mode.
///
/// Payloads are plain strings so a single terminal error can be cloned and
/// handed to every waiting consumer and pending control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Agent binary could not be resolved or the process failed to start.
    Spawn(String),
    /// Agent process exited unexpectedly or its streams closed uncleanly.
    Transport(String),
    /// Malformed wire data or an unrecognised control subtype.
    Protocol(String),
    /// The agent answered a control request with an error response.
    Control(String),
    /// A caller-supplied permission or hook callback failed.
    Callback(String),
    /// In-process MCP server bridge failure.
    Mcp(String),
    /// The session (or one of its channels) is already closed.
    Closed(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Control(msg) => write!(f, "control: {msg}"),
            Self::Callback(msg) => write!(f, "callback: {msg}"),
            Self::Mcp(msg) => write!(f, "mcp: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Message text without the category prefix.
    ///
    /// Used when an error is written back to the agent inside a
    /// `control_response`, where the category is noise.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Spawn(msg)
            | Self::Transport(msg)
            | Self::Protocol(msg)
            | Self::Control(msg)
            | Self::Callback(msg)
            | Self::Mcp(msg)
            | Self::Closed(msg)
            | Self::NotFound(msg)
            | Self::Io(msg) => msg,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
