//! Unit tests for inbound control request dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use agent_conduit::control::{
    can_use_tool, hook_callback, Dispatcher, HookMatcher, HookRegistry, PermissionDecision,
};
use agent_conduit::mcp::{handler_server, McpBridge, McpServer};
use agent_conduit::protocol::envelope::{ControlResponse, HookEvent, OUTBOUND_ONLY_SUBTYPES};
use agent_conduit::AppError;

fn dispatcher(
    permission: Option<agent_conduit::control::CanUseTool>,
    hooks: Arc<HookRegistry>,
) -> Dispatcher {
    Dispatcher::new("s1", permission, hooks, BTreeMap::new())
}

fn success_payload(response: ControlResponse) -> Value {
    match response {
        ControlResponse::Success { response, .. } => response.expect("payload"),
        ControlResponse::Error { error, .. } => panic!("expected success, got error: {error}"),
    }
}

fn error_message(response: ControlResponse) -> String {
    match response {
        ControlResponse::Error { error, .. } => error,
        ControlResponse::Success { response, .. } => {
            panic!("expected error, got success: {response:?}")
        }
    }
}

// ── can_use_tool ─────────────────────────────────────────────────────────────

/// Without a callback every tool use is allowed, answered for the same id.
#[tokio::test]
async fn permission_defaults_to_allow() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));

    let response = d
        .dispatch(
            "req_7".into(),
            json!({"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}),
        )
        .await;

    assert_eq!(response.request_id(), "req_7");
    assert_eq!(
        serde_json::to_value(&response).expect("serialize"),
        json!({"subtype":"success","request_id":"req_7","response":{"behavior":"allow"}})
    );
}

/// The callback sees the request fields and its decision is forwarded.
#[tokio::test]
async fn permission_callback_decision_is_forwarded() {
    let callback = can_use_tool(|tool, input, ctx| async move {
        assert_eq!(tool, "Write");
        assert_eq!(input, json!({"path":"/etc/passwd"}));
        assert_eq!(ctx.blocked_path.as_deref(), Some("/etc/passwd"));
        assert_eq!(ctx.tool_use_id.as_deref(), Some("tu_1"));
        assert_eq!(ctx.suggestions.as_ref().map(Vec::len), Some(1));
        Ok(PermissionDecision::Deny {
            message: "outside workspace".into(),
            interrupt: true,
        })
    });
    let d = dispatcher(Some(callback), Arc::new(HookRegistry::new()));

    let response = d
        .dispatch(
            "r".into(),
            json!({
                "subtype": "can_use_tool",
                "tool_name": "Write",
                "input": {"path": "/etc/passwd"},
                "blocked_path": "/etc/passwd",
                "tool_use_id": "tu_1",
                "permission_suggestions": [{"type": "addRules"}]
            }),
        )
        .await;

    assert_eq!(
        success_payload(response),
        json!({"behavior":"deny","message":"outside workspace","interrupt":true})
    );
}

/// A failing callback becomes an error response carrying its message.
#[tokio::test]
async fn permission_callback_error_becomes_error_response() {
    let callback = can_use_tool(|_, _, _| async {
        Err(AppError::Callback("policy store offline".into()))
    });
    let d = dispatcher(Some(callback), Arc::new(HookRegistry::new()));

    let response = d
        .dispatch("r".into(), json!({"subtype":"can_use_tool","tool_name":"Bash"}))
        .await;

    assert_eq!(error_message(response), "policy store offline");
}

/// A panicking callback is contained and answered with an error.
#[tokio::test]
async fn panicking_callback_becomes_error_response() {
    let callback = can_use_tool(|tool, _, _| async move {
        assert!(tool.is_empty(), "boom");
        Ok(PermissionDecision::allow())
    });
    let d = dispatcher(Some(callback), Arc::new(HookRegistry::new()));

    let response = d
        .dispatch("r".into(), json!({"subtype":"can_use_tool","tool_name":"Bash"}))
        .await;

    assert!(error_message(response).contains("boom"));
    assert_eq!(d.inflight_len(), 0);
}

/// `control_cancel_request` reaches the callback's signal.
#[tokio::test]
async fn cancel_signals_inflight_callback() {
    let callback = can_use_tool(|_, _, ctx| async move {
        ctx.signal.cancelled().await;
        Ok(PermissionDecision::deny("cancelled"))
    });
    let d = Arc::new(dispatcher(Some(callback), Arc::new(HookRegistry::new())));

    let task = {
        let d = Arc::clone(&d);
        tokio::spawn(async move {
            d.dispatch("slow".into(), json!({"subtype":"can_use_tool","tool_name":"Bash"}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(d.cancel("slow"));
    assert!(!d.cancel("other"));

    let response = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("callback must observe cancellation")
        .expect("join");
    assert_eq!(response.request_id(), "slow");
    assert_eq!(
        success_payload(response),
        json!({"behavior":"deny","message":"cancelled"})
    );
}

/// A reused request id keeps the newer dispatch cancellable after the older
/// one finishes.
#[tokio::test]
async fn reused_request_id_keeps_newer_dispatch_cancellable() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let release = Arc::clone(&gate);
    let callback = can_use_tool(move |tool, _, ctx| {
        let gate = Arc::clone(&gate);
        async move {
            if tool == "Gated" {
                gate.notified().await;
                return Ok(PermissionDecision::allow());
            }
            ctx.signal.cancelled().await;
            Ok(PermissionDecision::deny("cancelled"))
        }
    });
    let d = Arc::new(dispatcher(Some(callback), Arc::new(HookRegistry::new())));

    let spawn = |tool: &'static str| {
        let d = Arc::clone(&d);
        tokio::spawn(async move {
            d.dispatch("dup".into(), json!({"subtype":"can_use_tool","tool_name":tool}))
                .await
        })
    };
    let older = spawn("Gated");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let newer = spawn("Waiting");
    tokio::time::sleep(Duration::from_millis(20)).await;

    release.notify_one();
    let first = tokio::time::timeout(Duration::from_secs(2), older)
        .await
        .expect("gated callback must finish")
        .expect("join");
    assert_eq!(success_payload(first), json!({"behavior":"allow"}));
    assert_eq!(d.inflight_len(), 1);

    assert!(d.cancel("dup"));
    let second = tokio::time::timeout(Duration::from_secs(2), newer)
        .await
        .expect("newer callback must observe cancellation")
        .expect("join");
    assert_eq!(
        success_payload(second),
        json!({"behavior":"deny","message":"cancelled"})
    );
    assert_eq!(d.inflight_len(), 0);
}

// ── hook_callback ────────────────────────────────────────────────────────────

/// An unregistered callback id fails open with `{"continue": true}`.
#[tokio::test]
async fn unknown_hook_continues() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));

    let response = d
        .dispatch(
            "h".into(),
            json!({"subtype":"hook_callback","callback_id":"hook_99","input":{}}),
        )
        .await;

    assert_eq!(success_payload(response), json!({"continue": true}));
}

/// A registered hook receives its input and tool-use id.
#[tokio::test]
async fn registered_hook_result_is_forwarded() {
    let hooks = Arc::new(HookRegistry::new());
    let mut matchers = BTreeMap::new();
    matchers.insert(
        HookEvent::PreToolUse,
        vec![HookMatcher::new(vec![hook_callback(|input, tool_use_id, _| async move {
            Ok(json!({"seen": input, "tool_use_id": tool_use_id}))
        })])
        .with_matcher("Bash")],
    );
    let wire = hooks.register_matchers(&matchers);
    let id = wire[&HookEvent::PreToolUse][0].hook_callback_ids[0].clone();
    let d = dispatcher(None, Arc::clone(&hooks));

    let response = d
        .dispatch(
            "h".into(),
            json!({"subtype":"hook_callback","callback_id":id,"input":{"x":1},"tool_use_id":"tu"}),
        )
        .await;

    assert_eq!(
        success_payload(response),
        json!({"seen": {"x": 1}, "tool_use_id": "tu"})
    );
}

/// Registering again under the same id replaces the handler.
#[tokio::test]
async fn reregistering_hook_overwrites() {
    let hooks = Arc::new(HookRegistry::new());
    hooks.register("hook_0", hook_callback(|_, _, _| async { Ok(json!({"v": 1})) }));
    hooks.register("hook_0", hook_callback(|_, _, _| async { Ok(json!({"v": 2})) }));
    let d = dispatcher(None, Arc::clone(&hooks));

    let response = d
        .dispatch(
            "h".into(),
            json!({"subtype":"hook_callback","callback_id":"hook_0","input":{}}),
        )
        .await;

    assert_eq!(hooks.len(), 1);
    assert_eq!(success_payload(response), json!({"v": 2}));
}

// ── acknowledgements and errors ──────────────────────────────────────────────

#[tokio::test]
async fn inbound_initialize_and_interrupt_are_acknowledged() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));
    for subtype in ["initialize", "interrupt"] {
        let response = d
            .dispatch(subtype.into(), json!({ "subtype": subtype }))
            .await;
        assert_eq!(success_payload(response), json!({}), "{subtype}");
    }
}

/// Outbound-only subtypes received inbound are acknowledged with `{}`.
/// This mirrors the agent's own passthrough; it is not an endorsement.
#[tokio::test]
async fn outbound_only_subtypes_received_inbound_are_passthrough_acknowledged() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));
    for subtype in OUTBOUND_ONLY_SUBTYPES {
        let response = d
            .dispatch((*subtype).into(), json!({ "subtype": subtype }))
            .await;
        assert_eq!(response.request_id(), *subtype);
        assert_eq!(success_payload(response), json!({}), "{subtype}");
    }
}

#[tokio::test]
async fn unknown_subtype_is_named_in_error() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));

    let response = d
        .dispatch("u".into(), json!({"subtype":"teleport"}))
        .await;

    assert_eq!(
        error_message(response),
        "Unsupported control request subtype: teleport"
    );
}

#[tokio::test]
async fn missing_subtype_is_an_error() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));
    let response = d.dispatch("u".into(), json!({"tool_name":"Bash"})).await;
    assert!(error_message(response).contains("subtype"));
}

// ── mcp_message ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mcp_message_for_unknown_server_is_an_error() {
    let d = dispatcher(None, Arc::new(HookRegistry::new()));

    let response = d
        .dispatch(
            "m".into(),
            json!({"subtype":"mcp_message","server_name":"ghost","message":{"jsonrpc":"2.0","id":1,"method":"tools/list"}}),
        )
        .await;

    assert_eq!(error_message(response), "server not found: ghost");
}

/// A request to a registered server is wrapped as `{"mcp_response": …}`.
#[tokio::test]
async fn mcp_message_is_routed_to_the_bridge() {
    let server: Arc<dyn McpServer> = Arc::new(handler_server(|message: Value| async move {
        let id = message.get("id").cloned()?;
        Some(json!({"jsonrpc":"2.0","id":id,"result":{"tools":[]}}))
    }));
    let bridge = Arc::new(McpBridge::new("calc", server));
    bridge.connect().expect("connect");
    let mut bridges = BTreeMap::new();
    bridges.insert("calc".to_owned(), bridge);
    let d = Dispatcher::new("s1", None, Arc::new(HookRegistry::new()), bridges);

    let response = d
        .dispatch(
            "m".into(),
            json!({"subtype":"mcp_message","server_name":"calc","message":{"jsonrpc":"2.0","id":5,"method":"tools/list"}}),
        )
        .await;

    assert_eq!(
        success_payload(response),
        json!({"mcp_response": {"jsonrpc":"2.0","id":5,"result":{"tools":[]}}})
    );
}
