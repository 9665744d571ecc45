//! Control channel: outbound correlation and inbound dispatch.

pub mod correlator;
pub mod dispatcher;
pub mod hooks;
pub mod permission;

pub use correlator::{Correlator, Resolution};
pub use dispatcher::Dispatcher;
pub use hooks::{hook_callback, HookCallback, HookContext, HookMatcher, HookRegistry};
pub use permission::{can_use_tool, CanUseTool, PermissionContext, PermissionDecision};
