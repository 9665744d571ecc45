//! Inbound control request dispatcher.
//!
//! Turns every `control_request` the agent sends into exactly one
//! [`ControlResponse`] addressed to the same id. Caller callbacks run under
//! a per-request cancellation token so a `control_cancel_request` (or
//! session close) can signal them. Failures and panics inside callbacks
//! become error responses; they never escape into the read loop.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::hooks::{HookContext, HookRegistry};
use crate::control::permission::{CanUseTool, PermissionContext};
use crate::mcp::McpBridge;
use crate::protocol::envelope::{
    empty_object, ControlResponse, HookCallbackRequest, InboundRequest, McpMessageRequest,
    PermissionRequest,
};
use crate::{AppError, Result};

/// Answers inbound control requests for one session.
pub struct Dispatcher {
    session_id: String,
    can_use_tool: Option<CanUseTool>,
    hooks: Arc<HookRegistry>,
    bridges: BTreeMap<String, Arc<McpBridge>>,
    /// Latest dispatch per request id, tagged with its dispatch sequence.
    inflight: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("session_id", &self.session_id)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("hooks", &self.hooks)
            .field("bridges", &self.bridges.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher with the session's callbacks and bridges.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        can_use_tool: Option<CanUseTool>,
        hooks: Arc<HookRegistry>,
        bridges: BTreeMap<String, Arc<McpBridge>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            can_use_tool,
            hooks,
            bridges,
            inflight: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Answer one inbound request.
    ///
    /// Always returns a response for `request_id`, never an error.
    pub async fn dispatch(&self, request_id: String, request: Value) -> ControlResponse {
        let signal = self.shutdown.child_token();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(request_id.clone(), (seq, signal.clone()));

        let outcome = AssertUnwindSafe(self.handle(request, signal))
            .catch_unwind()
            .await;

        {
            // A repeated id may have replaced this entry; leave the newer one.
            let mut inflight = self.lock();
            if inflight.get(&request_id).is_some_and(|(owner, _)| *owner == seq) {
                inflight.remove(&request_id);
            }
        }

        match outcome {
            Ok(Ok(payload)) => ControlResponse::success(request_id, payload),
            Ok(Err(e)) => {
                debug!(session_id = %self.session_id, request_id = %request_id, error = %e, "dispatcher: request failed");
                ControlResponse::error(request_id, e.message())
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                warn!(session_id = %self.session_id, request_id = %request_id, detail = %detail, "dispatcher: callback panicked");
                ControlResponse::error(request_id, format!("callback panicked: {detail}"))
            }
        }
    }

    /// Signal the in-flight handler for `request_id`, if any.
    ///
    /// When the agent reused an id, the most recent dispatch is signalled.
    ///
    /// Returns whether a handler was found.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.lock().get(request_id) {
            Some((_, token)) => {
                token.cancel();
                debug!(session_id = %self.session_id, request_id = %request_id, "dispatcher: request cancelled");
                true
            }
            None => false,
        }
    }

    /// Number of requests currently being handled.
    #[must_use]
    pub fn inflight_len(&self) -> usize {
        self.lock().len()
    }

    /// Signal every in-flight handler and close every bridge.
    pub fn close(&self) {
        self.shutdown.cancel();
        for bridge in self.bridges.values() {
            bridge.close();
        }
    }

    async fn handle(&self, request: Value, signal: CancellationToken) -> Result<Value> {
        match InboundRequest::parse(request)? {
            InboundRequest::CanUseTool(req) => self.permission(req, signal).await,
            InboundRequest::HookCallback(req) => self.hook(req, signal).await,
            InboundRequest::McpMessage(req) => self.mcp(req).await,
            InboundRequest::Initialize | InboundRequest::Interrupt => Ok(empty_object()),
            InboundRequest::Passthrough(subtype) => {
                debug!(session_id = %self.session_id, subtype = %subtype, "dispatcher: acknowledging outbound-only subtype");
                Ok(empty_object())
            }
            InboundRequest::Unknown(subtype) => Err(AppError::Protocol(format!(
                "Unsupported control request subtype: {subtype}"
            ))),
        }
    }

    async fn permission(&self, req: PermissionRequest, signal: CancellationToken) -> Result<Value> {
        let Some(callback) = &self.can_use_tool else {
            return Ok(json!({ "behavior": "allow" }));
        };

        let ctx = PermissionContext {
            signal,
            suggestions: req.permission_suggestions,
            blocked_path: req.blocked_path,
            decision_reason: req.decision_reason,
            tool_use_id: req.tool_use_id,
            agent_id: req.agent_id,
        };
        let decision = callback(req.tool_name, req.input, ctx).await?;
        Ok(serde_json::to_value(decision)?)
    }

    async fn hook(&self, req: HookCallbackRequest, signal: CancellationToken) -> Result<Value> {
        let Some(callback) = self.hooks.get(&req.callback_id) else {
            debug!(
                session_id = %self.session_id,
                callback_id = %req.callback_id,
                "dispatcher: unknown hook callback, continuing"
            );
            return Ok(json!({ "continue": true }));
        };
        callback(req.input, req.tool_use_id, HookContext { signal }).await
    }

    async fn mcp(&self, req: McpMessageRequest) -> Result<Value> {
        let bridge = self
            .bridges
            .get(&req.server_name)
            .ok_or_else(|| AppError::NotFound(format!("server not found: {}", req.server_name)))?;
        let response = bridge.handle_message(req.message).await?;
        Ok(json!({ "mcp_response": response }))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
