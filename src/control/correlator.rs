//! Outbound request/response correlation.
//!
//! Every awaited control request registers a single-use slot under a fresh
//! id; the matching `control_response` resolves it. The `initialize`
//! handshake is tracked separately: its result is published on a
//! [`watch`] channel so any number of metadata accessors can await the same
//! answer without issuing new requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::protocol::envelope::{empty_object, ControlResponse};
use crate::{AppError, Result};

/// Receiver side of an awaited control request.
pub type PendingResponse = oneshot::Receiver<Result<Value>>;

#[derive(Debug, Clone)]
enum InitState {
    Waiting,
    Ready(Result<Value>),
}

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<String, oneshot::Sender<Result<Value>>>,
    init_id: Option<String>,
    closed: Option<AppError>,
}

/// Where a control response was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved the `initialize` handshake.
    Init,
    /// Resolved a pending awaited request.
    Pending,
    /// Matched nothing and was dropped.
    Unmatched,
}

/// Id allocator and pending-slot table for one session.
#[derive(Debug)]
pub struct Correlator {
    counter: AtomicU64,
    nonce: String,
    table: Mutex<Table>,
    init_tx: watch::Sender<InitState>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Empty correlator with a random id suffix.
    #[must_use]
    pub fn new() -> Self {
        let mut nonce = uuid::Uuid::new_v4().simple().to_string();
        nonce.truncate(8);
        let (init_tx, _) = watch::channel(InitState::Waiting);
        Self {
            counter: AtomicU64::new(0),
            nonce,
            table: Mutex::new(Table::default()),
            init_tx,
        }
    }

    /// Allocate a fresh request id, unique within this session.
    #[must_use]
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req_{n}_{}", self.nonce)
    }

    /// Register a pending slot for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns the closure error if the correlator is closed.
    pub fn register(&self, request_id: &str) -> Result<PendingResponse> {
        let mut table = self.lock();
        if let Some(err) = &table.closed {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        table.pending.insert(request_id.to_owned(), tx);
        Ok(rx)
    }

    /// Drop the slot for `request_id` without resolving it.
    ///
    /// Used when the request could not be written.
    pub fn forget(&self, request_id: &str) {
        self.lock().pending.remove(request_id);
    }

    /// Remember `request_id` as the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// - The closure error if the correlator is closed.
    /// - [`AppError::Protocol`] if a handshake was already started.
    pub fn begin_init(&self, request_id: &str) -> Result<()> {
        let mut table = self.lock();
        if let Some(err) = &table.closed {
            return Err(err.clone());
        }
        if table.init_id.is_some() {
            return Err(AppError::Protocol("initialize already sent".into()));
        }
        table.init_id = Some(request_id.to_owned());
        Ok(())
    }

    /// Route an inbound control response to its slot.
    pub fn resolve(&self, response: ControlResponse) -> Resolution {
        let (request_id, result) = match response {
            ControlResponse::Success {
                request_id,
                response,
            } => (request_id, Ok(response.unwrap_or_else(empty_object))),
            ControlResponse::Error { request_id, error } => {
                (request_id, Err(AppError::Control(error)))
            }
        };

        let mut table = self.lock();
        if table.init_id.as_deref() == Some(request_id.as_str()) {
            table.init_id = None;
            drop(table);
            self.init_tx.send_replace(InitState::Ready(result));
            debug!(request_id = %request_id, "correlator: initialize resolved");
            return Resolution::Init;
        }

        match table.pending.remove(&request_id) {
            Some(slot) => {
                drop(table);
                if slot.send(result).is_err() {
                    debug!(request_id = %request_id, "correlator: requester went away before response");
                }
                Resolution::Pending
            }
            None => {
                debug!(request_id = %request_id, "correlator: response for unknown request id dropped");
                Resolution::Unmatched
            }
        }
    }

    /// Await the `initialize` handshake result.
    ///
    /// Every caller observes the same result; nothing is sent.
    ///
    /// # Errors
    ///
    /// - [`AppError::Control`] if the agent rejected the handshake.
    /// - The closure error if the session closed before it was answered.
    pub async fn init_result(&self) -> Result<Value> {
        let mut rx = self.init_tx.subscribe();
        let state = rx
            .wait_for(|state| matches!(state, InitState::Ready(_)))
            .await
            .map_err(|_| AppError::Closed("initialize result unavailable".into()))?;
        match &*state {
            InitState::Ready(result) => result.clone(),
            InitState::Waiting => Err(AppError::Closed("initialize result unavailable".into())),
        }
    }

    /// Reject every pending slot and an unanswered handshake with `error`.
    ///
    /// Idempotent: only the first call has an effect. Returns the number of
    /// pending requests that were rejected.
    pub fn close(&self, error: AppError) -> usize {
        let (slots, init_pending) = {
            let mut table = self.lock();
            if table.closed.is_some() {
                return 0;
            }
            table.closed = Some(error.clone());
            let slots: Vec<_> = table.pending.drain().collect();
            (slots, table.init_id.take().is_some())
        };

        let rejected = slots.len();
        for (request_id, slot) in slots {
            if slot.send(Err(error.clone())).is_err() {
                debug!(request_id = %request_id, "correlator: rejected slot had no waiter");
            }
        }

        let unanswered = matches!(*self.init_tx.borrow(), InitState::Waiting);
        if init_pending || unanswered {
            self.init_tx.send_replace(InitState::Ready(Err(error)));
        }

        rejected
    }

    /// Whether [`Correlator::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// The error pending requests were rejected with, once closed.
    #[must_use]
    pub fn closed_error(&self) -> Option<AppError> {
        self.lock().closed.clone()
    }

    /// Number of unresolved awaited requests.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
