//! Push/pull bridge between the read loop and the caller.
//!
//! The router pushes messages as it reads them; the caller pulls with
//! [`MessageQueue::next`]. Completion is terminal: after
//! [`MessageQueue::complete`] every `next` drains what is buffered and then
//! reports end-of-stream (or the stored error).

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::{AppError, Result};

struct State<T> {
    items: VecDeque<T>,
    /// `None` while open; `Some(None)` for a clean end; `Some(Some(e))` for a failure.
    done: Option<Option<AppError>>,
}

/// Single-producer, multi-consumer async FIFO.
///
/// Items only leave the buffer inside the `next` call that returns them, so
/// dropping a pending `next` future never loses an item.
pub struct MessageQueue<T> {
    state: Mutex<State<T>>,
    ready: Notify,
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MessageQueue")
            .field("buffered", &state.items.len())
            .field("done", &state.done)
            .finish_non_exhaustive()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    /// Empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                done: None,
            }),
            ready: Notify::new(),
        }
    }

    /// Enqueue `item` and wake the oldest waiter.
    ///
    /// Dropped silently once the queue is complete. A woken waiter that is
    /// dropped before taking the item passes the wake-up on to the next one.
    pub fn push(&self, item: T) {
        {
            let mut state = self.lock();
            if state.done.is_some() {
                return;
            }
            state.items.push_back(item);
        }
        self.ready.notify_one();
    }

    /// Mark the queue finished, optionally with a terminal error.
    ///
    /// Every current waiter is woken with the error or end-of-stream.
    /// Returns `false` (and does nothing) if the queue was already complete.
    pub fn complete(&self, error: Option<AppError>) -> bool {
        {
            let mut state = self.lock();
            if state.done.is_some() {
                return false;
            }
            state.done = Some(error);
        }
        self.ready.notify_waiters();
        true
    }

    /// Next item in FIFO order.
    ///
    /// Returns `Some(Ok(item))` for buffered or newly pushed items,
    /// `Some(Err(e))` once the queue completed with an error and is drained,
    /// and `None` once it completed cleanly and is drained. Suspends while the
    /// queue is empty and open. Cancel-safe.
    pub async fn next(&self) -> Option<Result<T>> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await still wakes this waiter.
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(Ok(item));
                }
                if let Some(done) = &state.done {
                    return done.clone().map(Err);
                }
            }
            notified.await;
        }
    }

    /// Whether [`MessageQueue::complete`] has been called.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().done.is_some()
    }

    /// Number of buffered, undelivered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
