//! Unit tests for control envelope wire shapes and the stdin writer.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use agent_conduit::control::PermissionDecision;
use agent_conduit::protocol::envelope::{
    user_message, ControlCommand, HookEvent, HookMatcherConfig, InboundRequest,
    InitializeRequest, Outbound, PermissionMode,
};
use agent_conduit::protocol::writer::{channel, run_writer};
use agent_conduit::AppError;

fn request(command: ControlCommand) -> Value {
    serde_json::to_value(Outbound::ControlRequest {
        request_id: "req_1_abcd".into(),
        request: command,
    })
    .expect("serialize")
}

// ── Outbound commands ────────────────────────────────────────────────────────

/// An empty handshake carries only its subtype.
#[test]
fn bare_initialize_omits_empty_fields() {
    assert_eq!(
        request(ControlCommand::Initialize(InitializeRequest::default())),
        json!({"type":"control_request","request_id":"req_1_abcd","request":{"subtype":"initialize"}})
    );
}

/// Hooks, in-process servers and caller fields all land in the handshake.
#[test]
fn initialize_carries_hooks_servers_and_extra_fields() {
    let mut hooks = BTreeMap::new();
    hooks.insert(
        HookEvent::PreToolUse,
        vec![HookMatcherConfig {
            matcher: Some("Bash".into()),
            hook_callback_ids: vec!["hook_0".into(), "hook_1".into()],
            timeout: Some(30),
        }],
    );
    let mut extra = Map::new();
    extra.insert("systemPrompt".into(), json!("be brief"));

    let wire = request(ControlCommand::Initialize(InitializeRequest {
        hooks,
        sdk_mcp_servers: vec!["calc".into()],
        extra,
    }));

    assert_eq!(
        wire["request"],
        json!({
            "subtype": "initialize",
            "hooks": {
                "PreToolUse": [{"matcher":"Bash","hookCallbackIds":["hook_0","hook_1"],"timeout":30}]
            },
            "sdkMcpServers": ["calc"],
            "systemPrompt": "be brief"
        })
    );
}

#[test]
fn set_model_none_is_sent_as_null() {
    assert_eq!(
        request(ControlCommand::SetModel { model: None })["request"],
        json!({"subtype":"set_model","model":null})
    );
}

#[test]
fn permission_mode_uses_camel_case() {
    assert_eq!(
        request(ControlCommand::SetPermissionMode {
            mode: PermissionMode::AcceptEdits
        })["request"],
        json!({"subtype":"set_permission_mode","mode":"acceptEdits"})
    );
}

#[test]
fn mcp_commands_use_server_name_key() {
    assert_eq!(
        request(ControlCommand::McpToggle {
            server_name: "calc".into(),
            enabled: false
        })["request"],
        json!({"subtype":"mcp_toggle","serverName":"calc","enabled":false})
    );
    assert_eq!(
        request(ControlCommand::McpReconnect {
            server_name: "calc".into()
        })["request"],
        json!({"subtype":"mcp_reconnect","serverName":"calc"})
    );
    assert_eq!(
        request(ControlCommand::McpStatus)["request"],
        json!({"subtype":"mcp_status"})
    );
}

#[test]
fn subtype_names_match_the_wire() {
    let commands = [
        ControlCommand::Interrupt,
        ControlCommand::SetMaxThinkingTokens {
            max_thinking_tokens: Some(1024),
        },
        ControlCommand::McpSetServers { servers: json!({}) },
    ];
    for command in commands {
        let subtype = command.subtype();
        assert_eq!(request(command)["request"]["subtype"], json!(subtype));
    }
}

#[test]
fn user_message_shape() {
    assert_eq!(
        user_message("hello"),
        json!({
            "type": "user",
            "session_id": "",
            "message": {"role": "user", "content": [{"type": "text", "text": "hello"}]},
            "parent_tool_use_id": null
        })
    );
}

// ── Permission decisions ─────────────────────────────────────────────────────

#[test]
fn permission_decisions_serialize_minimally() {
    assert_eq!(
        serde_json::to_value(PermissionDecision::allow()).expect("serialize"),
        json!({"behavior":"allow"})
    );
    assert_eq!(
        serde_json::to_value(PermissionDecision::deny("no")).expect("serialize"),
        json!({"behavior":"deny","message":"no"})
    );
    assert_eq!(
        serde_json::to_value(PermissionDecision::Allow {
            updated_input: Some(json!({"command":"ls -la"})),
            updated_permissions: None,
        })
        .expect("serialize"),
        json!({"behavior":"allow","updatedInput":{"command":"ls -la"}})
    );
}

// ── Inbound parsing ──────────────────────────────────────────────────────────

#[test]
fn inbound_subtypes_are_classified() {
    assert!(matches!(
        InboundRequest::parse(json!({"subtype":"can_use_tool","tool_name":"Read"})),
        Ok(InboundRequest::CanUseTool(req)) if req.tool_name == "Read" && req.input.is_null()
    ));
    assert!(matches!(
        InboundRequest::parse(json!({"subtype":"hook_callback","callback_id":"hook_3"})),
        Ok(InboundRequest::HookCallback(req)) if req.callback_id == "hook_3"
    ));
    assert_eq!(
        InboundRequest::parse(json!({"subtype":"mcp_toggle"})),
        Ok(InboundRequest::Passthrough("mcp_toggle".into()))
    );
    assert_eq!(
        InboundRequest::parse(json!({"subtype":"rewind_files"})),
        Ok(InboundRequest::Unknown("rewind_files".into()))
    );
}

#[test]
fn known_subtype_missing_required_field_is_rejected() {
    let err = InboundRequest::parse(json!({"subtype":"mcp_message","server_name":"calc"}))
        .expect_err("message is required");
    assert!(matches!(err, AppError::Protocol(ref m) if m.starts_with("invalid mcp_message request")));
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Lines are written whole and in order; closing input ends the stream.
#[tokio::test]
async fn writer_emits_one_line_per_command_then_eof() {
    let (stdin, mut agent) = tokio::io::duplex(4096);
    let (handle, rx) = channel("s1");
    let task = tokio::spawn(run_writer("s1".into(), stdin, rx, CancellationToken::new()));

    handle.send_line(json!({"a": 1})).expect("queue");
    handle
        .send(&Outbound::ControlRequest {
            request_id: "r".into(),
            request: ControlCommand::Interrupt,
        })
        .expect("queue");
    handle.close_input();

    let mut written = String::new();
    agent.read_to_string(&mut written).await.expect("read to eof");
    task.await.expect("join").expect("writer result");

    assert_eq!(
        written,
        "{\"a\":1}\n{\"request\":{\"subtype\":\"interrupt\"},\"request_id\":\"r\",\"type\":\"control_request\"}\n"
    );
    assert!(matches!(handle.send_line(json!({})), Err(AppError::Closed(_))));
}

/// A write error on stdin stops the writer with an Io error.
#[tokio::test]
async fn writer_reports_broken_pipe() {
    let (stdin, agent) = tokio::io::duplex(64);
    drop(agent);
    let (handle, rx) = channel("s1");
    let task = tokio::spawn(run_writer("s1".into(), stdin, rx, CancellationToken::new()));

    handle.send_line(json!({"a": 1})).expect("queue");

    let err = task.await.expect("join").expect_err("pipe is gone");
    assert!(matches!(err, AppError::Io(ref m) if m.starts_with("write failed")));
}
