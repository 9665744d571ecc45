//! Session lifecycle: controller, options, message queue and init metadata.

pub mod controller;
pub mod metadata;
pub mod options;
pub mod queue;

pub use controller::{Session, SessionState};
pub use metadata::{AccountInfo, ModelInfo, OutputStyles, SlashCommand};
pub use options::{Prompt, SessionOptions, StderrCallback, DEFAULT_CLOSE_GRACE};
pub use queue::MessageQueue;
