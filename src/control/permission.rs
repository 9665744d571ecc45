//! Tool permission callback types.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Details the agent supplied with a `can_use_tool` request.
#[derive(Debug, Clone)]
pub struct PermissionContext {
    /// Fires when the agent cancels the request or the session closes.
    pub signal: CancellationToken,
    /// Permission updates the agent suggests applying.
    pub suggestions: Option<Vec<Value>>,
    /// Path that triggered the check.
    pub blocked_path: Option<String>,
    /// Why the agent is asking.
    pub decision_reason: Option<String>,
    /// Tool-use id of the pending call.
    pub tool_use_id: Option<String>,
    /// Sub-agent issuing the call.
    pub agent_id: Option<String>,
}

/// Caller decision for a tool use, forwarded to the agent as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionDecision {
    /// Let the tool run.
    Allow {
        /// Replacement tool input.
        #[serde(
            rename = "updatedInput",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        updated_input: Option<Value>,
        /// Permission rule updates to apply.
        #[serde(
            rename = "updatedPermissions",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        updated_permissions: Option<Vec<Value>>,
    },
    /// Refuse the tool use.
    Deny {
        /// Explanation shown to the agent.
        message: String,
        /// Also stop the current turn.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        interrupt: bool,
    },
}

impl PermissionDecision {
    /// Plain allow.
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Deny with `message`.
    #[must_use]
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }
}

/// Caller permission handler: `(tool_name, input, context) -> decision`.
pub type CanUseTool = Arc<
    dyn Fn(String, Value, PermissionContext) -> BoxFuture<'static, Result<PermissionDecision>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`CanUseTool`] handler.
#[must_use]
pub fn can_use_tool<F, Fut>(f: F) -> CanUseTool
where
    F: Fn(String, Value, PermissionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionDecision>> + Send + 'static,
{
    Arc::new(move |tool_name, input, ctx| f(tool_name, input, ctx).boxed())
}
