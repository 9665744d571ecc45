//! Agent stdin writer task.
//!
//! Every line the runtime sends (handshake, prompts, streamed input, control
//! requests, control responses) goes through one unbounded channel into one
//! task that owns the agent's stdin. Lines are therefore written whole and
//! never interleave, regardless of how many tasks produce them.

use std::sync::Arc;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::codec::NdjsonCodec;
use crate::protocol::envelope::Outbound;
use crate::{AppError, Result};

/// Instructions for the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum WriterCommand {
    /// Serialise and write one NDJSON line.
    Line(Value),
    /// Shut down stdin so the agent sees EOF, then stop.
    CloseInput,
}

/// Cloneable producer side of the writer channel.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    session_id: Arc<str>,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

/// Create a writer channel for `session_id`.
#[must_use]
pub fn channel(session_id: &str) -> (OutboundHandle, mpsc::UnboundedReceiver<WriterCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        OutboundHandle {
            session_id: Arc::from(session_id),
            tx,
        },
        rx,
    )
}

impl OutboundHandle {
    /// Queue one JSON value as a line.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Closed`] if the writer has stopped (input closed,
    /// write failure, or session shutdown).
    pub fn send_line(&self, value: Value) -> Result<()> {
        self.tx.send(WriterCommand::Line(value)).map_err(|_| {
            AppError::Closed(format!(
                "agent input closed for session '{}'",
                self.session_id
            ))
        })
    }

    /// Serialise and queue a control envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if serialisation fails, or
    /// [`AppError::Closed`] if the writer has stopped.
    pub fn send(&self, message: &Outbound) -> Result<()> {
        let value = serde_json::to_value(message)?;
        self.send_line(value)
    }

    /// Ask the writer to close the agent's stdin after pending lines.
    ///
    /// A no-op when the writer has already stopped.
    pub fn close_input(&self) {
        if self.tx.send(WriterCommand::CloseInput).is_err() {
            debug!(
                session_id = &*self.session_id,
                "writer: close requested on stopped writer"
            );
        }
    }

    /// Whether the writer task has stopped accepting lines.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Writer task: drains `rx` and writes each line to `stdin`.
///
/// Exits when `cancel` fires, when a [`WriterCommand::CloseInput`] has been
/// processed, or when every [`OutboundHandle`] is dropped. Dropping `rx` on
/// exit makes later sends fail fast with [`AppError::Closed`].
///
/// # Errors
///
/// - [`AppError::Protocol`] if a value fails to serialise.
/// - [`AppError::Io`]`("write failed: …")` if writing to `stdin` fails
///   (typically because the agent exited).
pub async fn run_writer<W>(
    session_id: String,
    mut stdin: W,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::new();

    loop {
        let command = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id = %session_id, "writer: cancellation received, stopping");
                break;
            }

            command = rx.recv() => command,
        };

        match command {
            None => {
                debug!(session_id = %session_id, "writer: all handles dropped, stopping");
                break;
            }
            Some(WriterCommand::CloseInput) => {
                if let Err(e) = stdin.shutdown().await {
                    debug!(session_id = %session_id, error = %e, "writer: stdin shutdown failed");
                }
                debug!(session_id = %session_id, "writer: agent input closed");
                break;
            }
            Some(WriterCommand::Line(value)) => {
                let line = serde_json::to_string(&value)?;
                buf.clear();
                codec.encode(line, &mut buf)?;

                let written = async {
                    stdin.write_all(&buf).await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    warn!(session_id = %session_id, error = %e, "writer: write to stdin failed");
                    return Err(AppError::Io(format!("write failed: {e}")));
                }
            }
        }
    }

    Ok(())
}
