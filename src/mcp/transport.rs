//! Synthetic in-memory transport handed to an in-process MCP server.
//!
//! The server reads inbound JSON-RPC messages from [`ServerTransport::recv`]
//! and writes everything it produces through a [`TransportSender`]. Outgoing
//! messages shaped like responses (an `id` and no `method`) resolve the
//! bridge's pending slot for that id; anything else is dropped, since the
//! control channel carries no server-initiated traffic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{AppError, Result};

/// Key a JSON-RPC id by its serialised form, so `1` and `"1"` stay distinct.
pub(crate) fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Response-shaped messages carry an `id` and no `method`.
pub(crate) fn response_id(message: &Value) -> Option<&Value> {
    if message.get("method").is_some() {
        return None;
    }
    message.get("id").filter(|id| !id.is_null())
}

#[derive(Debug, Default)]
struct Slots {
    waiting: HashMap<String, oneshot::Sender<Result<Value>>>,
    closed: bool,
}

/// In-flight JSON-RPC requests of one bridge connection.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    pub(crate) fn register(
        &self,
        server: &str,
        key: String,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(AppError::Mcp(format!("server '{server}' is not connected")));
        }
        let (tx, rx) = oneshot::channel();
        slots.waiting.insert(key, tx);
        Ok(rx)
    }

    pub(crate) fn resolve(&self, key: &str, message: Value) -> bool {
        let slot = self.lock().waiting.remove(key);
        match slot {
            Some(tx) => {
                // The requester may have given up; nothing else to notify.
                let _ = tx.send(Ok(message));
                true
            }
            None => false,
        }
    }

    pub(crate) fn forget(&self, key: &str) {
        self.lock().waiting.remove(key);
    }

    pub(crate) fn close(&self, error: &AppError) -> usize {
        let drained: Vec<_> = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.waiting.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Send half of a [`ServerTransport`].
#[derive(Debug, Clone)]
pub struct TransportSender {
    server: Arc<str>,
    pending: Arc<PendingTable>,
}

impl TransportSender {
    pub(crate) fn new(server: Arc<str>, pending: Arc<PendingTable>) -> Self {
        Self { server, pending }
    }

    /// Hand one outgoing message to the bridge.
    ///
    /// Returns `true` when it answered a pending request.
    pub fn send(&self, message: Value) -> bool {
        let Some(key) = response_id(&message).map(id_key) else {
            debug!(server = &*self.server, "mcp transport: dropping non-response message");
            return false;
        };
        if self.pending.resolve(&key, message) {
            true
        } else {
            debug!(server = &*self.server, id = %key, "mcp transport: response for unknown id dropped");
            false
        }
    }
}

/// Transport attached to an in-process server by the bridge.
#[derive(Debug)]
pub struct ServerTransport {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: TransportSender,
}

impl ServerTransport {
    pub(crate) fn new(incoming: mpsc::UnboundedReceiver<Value>, outgoing: TransportSender) -> Self {
        Self { incoming, outgoing }
    }

    /// Next inbound message; `None` once the bridge disconnects.
    pub async fn recv(&mut self) -> Option<Value> {
        self.incoming.recv().await
    }

    /// A handle for writing outgoing messages.
    #[must_use]
    pub fn sender(&self) -> TransportSender {
        self.outgoing.clone()
    }

    /// Split into the receive and send halves.
    #[must_use]
    pub fn split(self) -> (mpsc::UnboundedReceiver<Value>, TransportSender) {
        (self.incoming, self.outgoing)
    }
}
