//! Bridge between `mcp_message` control requests and one in-process server.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::server::McpServer;
use super::transport::{id_key, PendingTable, ServerTransport, TransportSender};
use crate::{AppError, Result};

#[derive(Default)]
struct Connection {
    inbound: Option<mpsc::UnboundedSender<Value>>,
    pending: Arc<PendingTable>,
}

/// Routes JSON-RPC messages to a named [`McpServer`] and awaits its replies.
///
/// Request ids are tracked per bridge, independent of the session's control
/// request ids.
pub struct McpBridge {
    name: Arc<str>,
    server: Arc<dyn McpServer>,
    connection: Mutex<Connection>,
}

impl fmt::Debug for McpBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection = self.lock();
        f.debug_struct("McpBridge")
            .field("name", &self.name)
            .field("connected", &connection.inbound.is_some())
            .field("pending", &connection.pending.len())
            .finish()
    }
}

impl McpBridge {
    /// Unconnected bridge for `server`, addressed as `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, server: Arc<dyn McpServer>) -> Self {
        Self {
            name: Arc::from(name.into()),
            server,
            connection: Mutex::new(Connection::default()),
        }
    }

    /// Server name used in `mcp_message` requests.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detach the server from any prior transport and attach a fresh one.
    ///
    /// Requests still waiting on the previous transport are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Mcp`] if the server refuses the transport.
    pub fn connect(&self) -> Result<()> {
        self.server.disconnect();

        let pending = Arc::new(PendingTable::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ServerTransport::new(
            rx,
            TransportSender::new(Arc::clone(&self.name), Arc::clone(&pending)),
        );

        let previous = {
            let mut connection = self.lock();
            let previous = std::mem::replace(
                &mut *connection,
                Connection {
                    inbound: Some(tx),
                    pending,
                },
            );
            previous.pending
        };
        previous.close(&self.reconnected_error());

        self.server.connect(transport).inspect_err(|_| {
            self.lock().inbound = None;
        })?;
        debug!(server = &*self.name, "mcp bridge: connected");
        Ok(())
    }

    /// Deliver `message` to the server.
    ///
    /// A request (`method` and `id`) resolves with the server's response.
    /// Anything else is delivered and acknowledged immediately with
    /// `{"jsonrpc":"2.0","result":{},"id":0}`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Mcp`] if the bridge is not connected or closes
    /// before the server answers.
    pub async fn handle_message(&self, message: Value) -> Result<Value> {
        let request_key = match (message.get("method"), message.get("id")) {
            (Some(_), Some(id)) if !id.is_null() => Some(id_key(id)),
            _ => None,
        };

        let Some(key) = request_key else {
            self.deliver(message)?;
            return Ok(json!({ "jsonrpc": "2.0", "result": {}, "id": 0 }));
        };

        let (pending, inbound) = {
            let connection = self.lock();
            (Arc::clone(&connection.pending), connection.inbound.clone())
        };
        let Some(inbound) = inbound else {
            return Err(self.disconnected_error());
        };

        let rx = pending.register(&self.name, key.clone())?;
        if inbound.send(message).is_err() {
            pending.forget(&key);
            return Err(self.disconnected_error());
        }

        rx.await.unwrap_or_else(|_| {
            Err(AppError::Mcp(format!(
                "server '{}' dropped request {key}",
                self.name
            )))
        })
    }

    /// Stop delivering messages and reject every in-flight request.
    ///
    /// Returns the number of rejected requests.
    pub fn close(&self) -> usize {
        let pending = {
            let mut connection = self.lock();
            connection.inbound = None;
            Arc::clone(&connection.pending)
        };
        let rejected = pending.close(&AppError::Mcp(format!(
            "server '{}' bridge closed",
            self.name
        )));
        self.server.disconnect();
        debug!(server = &*self.name, rejected, "mcp bridge: closed");
        rejected
    }

    /// Number of requests waiting for a server response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn deliver(&self, message: Value) -> Result<()> {
        let inbound = self.lock().inbound.clone();
        match inbound {
            Some(tx) if tx.send(message).is_ok() => Ok(()),
            _ => Err(self.disconnected_error()),
        }
    }

    fn disconnected_error(&self) -> AppError {
        AppError::Mcp(format!("server '{}' is not connected", self.name))
    }

    fn reconnected_error(&self) -> AppError {
        AppError::Mcp(format!("server '{}' reconnected", self.name))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
