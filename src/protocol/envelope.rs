//! Control-channel envelopes.
//!
//! Both directions share one envelope shape:
//!
//! ```json
//! {"type":"control_request","request_id":"req_1_ab12cd34","request":{"subtype":"interrupt"}}
//! {"type":"control_response","response":{"subtype":"success","request_id":"req_1_ab12cd34","response":{}}}
//! ```
//!
//! Outbound commands are the closed [`ControlCommand`] enum. Inbound
//! requests are parsed into [`InboundRequest`], which keeps an explicit
//! [`InboundRequest::Unknown`] case so unrecognised subtypes can be answered
//! with an error instead of being dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// `type` of a control request line.
pub const CONTROL_REQUEST: &str = "control_request";
/// `type` of a control response line.
pub const CONTROL_RESPONSE: &str = "control_response";
/// `type` of a line cancelling an in-flight inbound control request.
pub const CONTROL_CANCEL_REQUEST: &str = "control_cancel_request";

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Permission mode understood by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Prompt for every sensitive tool use.
    Default,
    /// Auto-approve file edits.
    AcceptEdits,
    /// Skip permission checks entirely.
    BypassPermissions,
    /// Planning only; no tool execution.
    Plan,
}

/// Lifecycle points at which the agent invokes caller hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before a tool runs.
    PreToolUse,
    /// After a tool succeeded.
    PostToolUse,
    /// After a tool failed.
    PostToolUseFailure,
    /// Agent notification.
    Notification,
    /// A user prompt was submitted.
    UserPromptSubmit,
    /// Session started.
    SessionStart,
    /// Session ended.
    SessionEnd,
    /// Agent is about to stop.
    Stop,
    /// Sub-agent started.
    SubagentStart,
    /// Sub-agent stopped.
    SubagentStop,
    /// Before context compaction.
    PreCompact,
    /// A permission dialog would be shown.
    PermissionRequest,
}

/// Wire form of one hook matcher inside the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookMatcherConfig {
    /// Tool-name pattern the matcher applies to; all tools when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    /// Callback ids the agent sends back in `hook_callback` requests.
    #[serde(rename = "hookCallbackIds")]
    pub hook_callback_ids: Vec<String>,
    /// Per-hook timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Payload of the `initialize` handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitializeRequest {
    /// Registered hooks keyed by event.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<HookEvent, Vec<HookMatcherConfig>>,
    /// Names of in-process MCP servers reachable through `mcp_message`.
    #[serde(rename = "sdkMcpServers", skip_serializing_if = "Vec::is_empty")]
    pub sdk_mcp_servers: Vec<String>,
    /// Additional caller fields merged into the request verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Commands the runtime sends to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Session handshake; sent exactly once, first.
    Initialize(InitializeRequest),
    /// Stop the current turn.
    Interrupt,
    /// Change the permission mode.
    SetPermissionMode {
        /// New mode.
        mode: PermissionMode,
    },
    /// Change the model; `None` restores the default.
    SetModel {
        /// Model identifier.
        model: Option<String>,
    },
    /// Change the thinking budget; `None` clears it.
    SetMaxThinkingTokens {
        /// Token budget.
        max_thinking_tokens: Option<u64>,
    },
    /// Query MCP server status.
    McpStatus,
    /// Reconnect one MCP server.
    McpReconnect {
        /// Server to reconnect.
        #[serde(rename = "serverName")]
        server_name: String,
    },
    /// Enable or disable one MCP server.
    McpToggle {
        /// Server to toggle.
        #[serde(rename = "serverName")]
        server_name: String,
        /// Desired state.
        enabled: bool,
    },
    /// Replace the dynamic MCP server set.
    McpSetServers {
        /// Server name → server configuration.
        servers: Value,
    },
}

impl ControlCommand {
    /// Wire subtype, for logging.
    #[must_use]
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Interrupt => "interrupt",
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::SetModel { .. } => "set_model",
            Self::SetMaxThinkingTokens { .. } => "set_max_thinking_tokens",
            Self::McpStatus => "mcp_status",
            Self::McpReconnect { .. } => "mcp_reconnect",
            Self::McpToggle { .. } => "mcp_toggle",
            Self::McpSetServers { .. } => "mcp_set_servers",
        }
    }
}

/// Response envelope body, used in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponse {
    /// The request succeeded.
    Success {
        /// Id of the request being answered.
        request_id: String,
        /// Result payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    /// The request failed.
    Error {
        /// Id of the request being answered.
        request_id: String,
        /// Failure description.
        error: String,
    },
}

impl ControlResponse {
    /// Success response carrying `payload`.
    #[must_use]
    pub fn success(request_id: impl Into<String>, payload: Value) -> Self {
        Self::Success {
            request_id: request_id.into(),
            response: Some(payload),
        }
    }

    /// Error response carrying `message`.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            request_id: request_id.into(),
            error: message.into(),
        }
    }

    /// Id of the request this response answers.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }
}

/// Top-level control lines written to the agent's stdin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// A command issued by the runtime.
    ControlRequest {
        /// Correlation id.
        request_id: String,
        /// The command.
        request: ControlCommand,
    },
    /// The answer to an inbound control request.
    ControlResponse {
        /// Response body.
        response: ControlResponse,
    },
}

/// Build the user message written for a plain prompt string.
#[must_use]
pub fn user_message(text: &str) -> Value {
    serde_json::json!({
        "type": "user",
        "session_id": "",
        "message": {
            "role": "user",
            "content": [{ "type": "text", "text": text }]
        },
        "parent_tool_use_id": null
    })
}

/// An empty JSON object, the payload of bare acknowledgements.
#[must_use]
pub fn empty_object() -> Value {
    Value::Object(Map::new())
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Fields of a `can_use_tool` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PermissionRequest {
    /// Tool the agent wants to use.
    pub tool_name: String,
    /// Tool input.
    #[serde(default)]
    pub input: Value,
    /// Permission updates the agent suggests applying.
    #[serde(default)]
    pub permission_suggestions: Option<Vec<Value>>,
    /// Path that triggered the check, if any.
    #[serde(default)]
    pub blocked_path: Option<String>,
    /// Why the agent is asking.
    #[serde(default)]
    pub decision_reason: Option<String>,
    /// Tool-use id of the pending call.
    #[serde(default)]
    pub tool_use_id: Option<String>,
    /// Sub-agent issuing the call.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Fields of a `hook_callback` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HookCallbackRequest {
    /// Id assigned at registration time.
    pub callback_id: String,
    /// Hook input payload.
    #[serde(default)]
    pub input: Value,
    /// Tool-use id the hook relates to.
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

/// Fields of an `mcp_message` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpMessageRequest {
    /// Target in-process server.
    pub server_name: String,
    /// JSON-RPC message for the server.
    pub message: Value,
}

/// Control requests the agent sends to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRequest {
    /// Tool permission check.
    CanUseTool(PermissionRequest),
    /// Hook invocation.
    HookCallback(HookCallbackRequest),
    /// Message for an in-process MCP server.
    McpMessage(McpMessageRequest),
    /// `initialize` received inbound; acknowledged only.
    Initialize,
    /// `interrupt` received inbound; acknowledged only.
    Interrupt,
    /// A subtype normally sent runtime → agent, received inbound; acknowledged only.
    Passthrough(String),
    /// Anything else.
    Unknown(String),
}

/// Subtypes that normally travel runtime → agent only.
pub const OUTBOUND_ONLY_SUBTYPES: &[&str] = &[
    "set_permission_mode",
    "set_model",
    "set_max_thinking_tokens",
    "mcp_status",
    "mcp_reconnect",
    "mcp_toggle",
    "mcp_set_servers",
];

impl InboundRequest {
    /// Parse the `request` object of an inbound control request.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`]`("control request missing subtype")` when
    ///   there is no string `subtype`.
    /// - [`AppError::Protocol`]`("invalid <subtype> request: …")` when a known
    ///   subtype lacks a required field.
    pub fn parse(request: Value) -> Result<Self> {
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Protocol("control request missing subtype".into()))?
            .to_owned();

        let parsed = match subtype.as_str() {
            "can_use_tool" => Self::CanUseTool(fields(&subtype, request)?),
            "hook_callback" => Self::HookCallback(fields(&subtype, request)?),
            "mcp_message" => Self::McpMessage(fields(&subtype, request)?),
            "initialize" => Self::Initialize,
            "interrupt" => Self::Interrupt,
            s if OUTBOUND_ONLY_SUBTYPES.contains(&s) => Self::Passthrough(subtype),
            _ => Self::Unknown(subtype),
        };
        Ok(parsed)
    }
}

fn fields<T: serde::de::DeserializeOwned>(subtype: &str, request: Value) -> Result<T> {
    serde_json::from_value(request)
        .map_err(|e| AppError::Protocol(format!("invalid {subtype} request: {e}")))
}
