#![forbid(unsafe_code)]

//! Bidirectional NDJSON session runtime for driving an external agent process.

pub mod config;
pub mod control;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod process;
pub mod protocol;
pub mod session;

pub use config::RuntimeConfig;
pub use errors::{AppError, Result};
pub use session::{Prompt, Session, SessionOptions, SessionState};
