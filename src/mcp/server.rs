//! Server-side seam of the MCP bridge.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::transport::ServerTransport;
use crate::{AppError, Result};

/// An MCP server instance living inside the caller's process.
///
/// The bridge calls [`McpServer::connect`] once per session (after a
/// [`McpServer::disconnect`] to drop any earlier attachment) and
/// [`McpServer::disconnect`] when the session closes.
pub trait McpServer: Send + Sync {
    /// Attach `transport`; the server serves it until disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Mcp`] if the server cannot start serving.
    fn connect(&self, transport: ServerTransport) -> Result<()>;

    /// Detach the current transport, if any.
    fn disconnect(&self);
}

/// Message handler used by [`HandlerServer`]: returns the reply for a
/// request, or `None` for notifications.
pub type MessageHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

/// Minimal [`McpServer`] that answers each inbound message with a handler.
///
/// Messages are handled concurrently, one task each.
pub struct HandlerServer {
    handler: MessageHandler,
    current: Mutex<Option<CancellationToken>>,
}

impl fmt::Debug for HandlerServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerServer")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Build a [`HandlerServer`] from an async closure.
#[must_use]
pub fn handler_server<F, Fut>(f: F) -> HandlerServer
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    HandlerServer {
        handler: Arc::new(move |message| f(message).boxed()),
        current: Mutex::new(None),
    }
}

impl HandlerServer {
    /// Whether a transport is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl McpServer for HandlerServer {
    fn connect(&self, transport: ServerTransport) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::Mcp(format!("no async runtime to serve on: {e}")))?;

        let cancel = CancellationToken::new();
        if let Some(previous) = self.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let handler = Arc::clone(&self.handler);
        let (mut incoming, sender) = transport.split();
        runtime.spawn(async move {
            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => break,
                    message = incoming.recv() => message,
                };
                let Some(message) = message else { break };

                let handler = Arc::clone(&handler);
                let sender = sender.clone();
                tokio::spawn(async move {
                    if let Some(reply) = handler(message).await {
                        sender.send(reply);
                    }
                });
            }
            debug!("mcp server: transport detached");
        });
        Ok(())
    }

    fn disconnect(&self) {
        if let Some(cancel) = self.lock().take() {
            cancel.cancel();
        }
    }
}
