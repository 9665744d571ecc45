//! NDJSON wire protocol spoken with the agent process.
//!
//! Every record is one JSON object on one `\n`-terminated UTF-8 line.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a line-length cap.
//! - `envelope`: typed control request/response envelopes for both directions.
//! - `router`: the read loop that classifies each inbound line and fans it out
//!   to a [`LineSink`](router::LineSink).
//! - `writer`: the single task that owns the agent's stdin and serialises writes.

pub mod codec;
pub mod envelope;
pub mod router;
pub mod writer;
