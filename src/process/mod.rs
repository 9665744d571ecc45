//! Agent process collaborators: binary resolution and spawning.

pub mod resolve;
pub mod spawner;

pub use resolve::resolve_program;
pub use spawner::{
    spawn_agent, AgentProcess, AgentTransport, ExitInfo, SpawnConfig, ALLOWED_ENV_VARS,
    SESSION_ID_ENV,
};
