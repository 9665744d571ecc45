//! Line router: the session's single read loop.
//!
//! Reads NDJSON lines from the agent's stdout, classifies each record, and
//! hands it to one narrow [`LineSink`] callback. The router never touches
//! session state directly, so it can be driven with a fake sink in tests.
//!
//! # Classification
//!
//! | `type`                   | Sink callback                            |
//! |--------------------------|------------------------------------------|
//! | `control_request`        | [`LineSink::on_control_request`]         |
//! | `control_response`       | [`LineSink::on_control_response`]        |
//! | `control_cancel_request` | [`LineSink::on_control_cancel`]          |
//! | *(anything else)*        | [`LineSink::on_message`]                 |
//!
//! Blank lines are skipped. Non-JSON and over-long lines are logged at
//! `WARN` and skipped; they never stop the loop.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::codec::NdjsonCodec;
use crate::protocol::envelope::{
    ControlResponse, CONTROL_CANCEL_REQUEST, CONTROL_REQUEST, CONTROL_RESPONSE,
};
use crate::{AppError, Result};

/// One classified inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedLine {
    /// The agent is asking the runtime something.
    ControlRequest {
        /// Correlation id to answer with.
        request_id: String,
        /// The `request` object, including its `subtype`.
        request: Value,
    },
    /// The agent answered one of the runtime's requests.
    ControlResponse(ControlResponse),
    /// The agent withdrew an in-flight control request.
    ControlCancel {
        /// Id of the withdrawn request.
        request_id: String,
    },
    /// Ordinary session output, passed through untouched.
    Message(Value),
}

/// Receiver of routed lines.
///
/// Callbacks are synchronous and must not block; long-running work (such as
/// answering a control request) is spawned by the implementation so reading
/// continues meanwhile.
pub trait LineSink: Send + Sync {
    /// An inbound control request arrived.
    fn on_control_request(&self, request_id: String, request: Value);
    /// A control response arrived.
    fn on_control_response(&self, response: ControlResponse);
    /// The agent cancelled the inbound request `request_id`.
    fn on_control_cancel(&self, request_id: String);
    /// An ordinary message arrived.
    fn on_message(&self, message: Value);
    /// Reading stopped. Called exactly once per router run; `error` is set
    /// when the stream failed rather than ending cleanly.
    fn on_done(&self, error: Option<AppError>);
}

/// Parse and classify one NDJSON line.
///
/// # Return value
///
/// - `Ok(Some(line))`: a classified record.
/// - `Ok(None)`: the line is blank.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Protocol`]`("expected a json object …")`: valid JSON that is
///   not an object.
/// - [`AppError::Protocol`]`("invalid control_request: …")` and friends: a
///   control envelope with missing or ill-typed fields.
pub fn parse_line(line: &str) -> Result<Option<RoutedLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    let Value::Object(mut object) = value else {
        return Err(AppError::Protocol(
            "expected a json object on each line".into(),
        ));
    };

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let routed = match kind.as_str() {
        CONTROL_REQUEST => {
            let request_id = take_request_id(&object, CONTROL_REQUEST)?;
            let request = object
                .remove("request")
                .filter(Value::is_object)
                .ok_or_else(|| {
                    AppError::Protocol("invalid control_request: missing `request` object".into())
                })?;
            RoutedLine::ControlRequest {
                request_id,
                request,
            }
        }
        CONTROL_RESPONSE => {
            let body = object.remove("response").ok_or_else(|| {
                AppError::Protocol("invalid control_response: missing `response`".into())
            })?;
            let response: ControlResponse = serde_json::from_value(body)
                .map_err(|e| AppError::Protocol(format!("invalid control_response: {e}")))?;
            RoutedLine::ControlResponse(response)
        }
        CONTROL_CANCEL_REQUEST => RoutedLine::ControlCancel {
            request_id: take_request_id(&object, CONTROL_CANCEL_REQUEST)?,
        },
        _ => RoutedLine::Message(Value::Object(object)),
    };

    Ok(Some(routed))
}

/// Handle to a running read loop.
#[derive(Debug, Clone, Default)]
pub struct LineRouter {
    cancel: CancellationToken,
}

impl LineRouter {
    /// Router handle that has not started reading yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the read loop over `stdout` on a background task.
    pub fn spawn<R>(
        &self,
        session_id: String,
        stdout: R,
        max_line_bytes: usize,
        sink: Arc<dyn LineSink>,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            run_router(&session_id, stdout, max_line_bytes, sink.as_ref(), cancel).await;
        })
    }

    /// Stop reading. Safe to call any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`LineRouter::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Read loop: decode lines from `stdout` and route them into `sink`.
///
/// Returns after EOF, a fatal I/O error, or cancellation, having called
/// [`LineSink::on_done`] exactly once.
pub async fn run_router<R>(
    session_id: &str,
    stdout: R,
    max_line_bytes: usize,
    sink: &dyn LineSink,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, NdjsonCodec::with_max_length(max_line_bytes));
    // FramedRead yields one `None` after a decode error, then resumes reading.
    let mut resuming = false;

    let outcome = loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "router: closed, stopping");
                break None;
            }

            item = framed.next() => item,
        };

        match item {
            None if resuming => resuming = false,
            None => {
                debug!(session_id, "router: EOF on agent output");
                break None;
            }
            Some(Err(AppError::Protocol(msg))) => {
                warn!(session_id, error = msg.as_str(), "router: framing error, skipping line");
                resuming = true;
            }
            Some(Err(e)) => {
                warn!(session_id, error = %e, "router: read error, stopping");
                break Some(AppError::Transport(format!("agent output failed: {e}")));
            }
            Some(Ok(line)) => {
                resuming = false;
                match parse_line(&line) {
                    Ok(Some(routed)) => deliver(session_id, sink, routed),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session_id, error = %e, raw_line = %line, "router: parse error, skipping line");
                    }
                }
            }
        }
    };

    sink.on_done(outcome);
}

fn deliver(session_id: &str, sink: &dyn LineSink, routed: RoutedLine) {
    match routed {
        RoutedLine::ControlRequest {
            request_id,
            request,
        } => {
            debug!(session_id, request_id = %request_id, "router: inbound control request");
            sink.on_control_request(request_id, request);
        }
        RoutedLine::ControlResponse(response) => {
            debug!(
                session_id,
                request_id = response.request_id(),
                "router: control response"
            );
            sink.on_control_response(response);
        }
        RoutedLine::ControlCancel { request_id } => {
            debug!(session_id, request_id = %request_id, "router: control request cancelled");
            sink.on_control_cancel(request_id);
        }
        RoutedLine::Message(message) => sink.on_message(message),
    }
}

fn take_request_id(object: &serde_json::Map<String, Value>, kind: &str) -> Result<String> {
    object
        .get("request_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Protocol(format!("invalid {kind}: missing `request_id`")))
}
