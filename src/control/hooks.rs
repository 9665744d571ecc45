//! Hook callback registration.
//!
//! Callers attach hooks to lifecycle events at session start. Each handler
//! gets a generated callback id; the ids are announced to the agent in the
//! `initialize` request and echoed back in `hook_callback` requests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::protocol::envelope::{HookEvent, HookMatcherConfig};
use crate::Result;

/// Context handed to a hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Fires when the agent cancels the request or the session closes.
    pub signal: CancellationToken,
}

/// Caller hook handler: `(input, tool_use_id, context) -> output`.
pub type HookCallback =
    Arc<dyn Fn(Value, Option<String>, HookContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`HookCallback`].
#[must_use]
pub fn hook_callback<F, Fut>(f: F) -> HookCallback
where
    F: Fn(Value, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |input, tool_use_id, ctx| f(input, tool_use_id, ctx).boxed())
}

/// Handlers attached to one event, optionally limited to matching tools.
#[derive(Clone)]
pub struct HookMatcher {
    /// Tool-name pattern; `None` applies to every tool.
    pub matcher: Option<String>,
    /// Handlers run for this matcher.
    pub hooks: Vec<HookCallback>,
    /// Timeout in seconds forwarded to the agent.
    pub timeout: Option<u64>,
}

impl HookMatcher {
    /// Matcher applying `hooks` to every tool.
    #[must_use]
    pub fn new(hooks: Vec<HookCallback>) -> Self {
        Self {
            matcher: None,
            hooks,
            timeout: None,
        }
    }

    /// Restrict the matcher to tools matching `pattern`.
    #[must_use]
    pub fn with_matcher(mut self, pattern: impl Into<String>) -> Self {
        self.matcher = Some(pattern.into());
        self
    }

    /// Set the per-hook timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

impl fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("hooks", &self.hooks.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Callback id → handler table for one session.
#[derive(Default)]
pub struct HookRegistry {
    entries: Mutex<HashMap<String, HookCallback>>,
    counter: AtomicU64,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

impl HookRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `callback` under `id`, replacing any previous handler.
    pub fn register(&self, id: impl Into<String>, callback: HookCallback) {
        self.lock().insert(id.into(), callback);
    }

    /// Handler registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<HookCallback> {
        self.lock().get(id).cloned()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register every handler in `matchers` under fresh ids and return the
    /// wire configuration for the `initialize` request.
    pub fn register_matchers(
        &self,
        matchers: &BTreeMap<HookEvent, Vec<HookMatcher>>,
    ) -> BTreeMap<HookEvent, Vec<HookMatcherConfig>> {
        let mut wire = BTreeMap::new();
        for (event, list) in matchers {
            let configs = list
                .iter()
                .map(|m| HookMatcherConfig {
                    matcher: m.matcher.clone(),
                    hook_callback_ids: m
                        .hooks
                        .iter()
                        .map(|hook| {
                            let id = self.next_id();
                            self.register(id.clone(), Arc::clone(hook));
                            id
                        })
                        .collect(),
                    timeout: m.timeout,
                })
                .collect::<Vec<_>>();
            if !configs.is_empty() {
                wire.insert(*event, configs);
            }
        }
        wire
    }

    fn next_id(&self) -> String {
        format!("hook_{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HookCallback>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
