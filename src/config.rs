//! Runtime configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::process::spawner::{SpawnConfig, DEFAULT_PROTOCOL_ARGS};
use crate::session::SessionOptions;
use crate::{AppError, Result};

fn default_protocol_args() -> Vec<String> {
    DEFAULT_PROTOCOL_ARGS.iter().map(|s| (*s).to_owned()).collect()
}

fn default_true() -> bool {
    true
}

fn default_close_grace_ms() -> u64 {
    5000
}

fn default_max_line_bytes() -> usize {
    crate::protocol::codec::MAX_LINE_BYTES
}

/// Agent process launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary: absolute path, relative path, or bare name looked up on `PATH`.
    pub program: String,
    /// Caller arguments appended after [`AgentConfig::protocol_args`].
    #[serde(default)]
    pub args: Vec<String>,
    /// Flags that switch the agent into NDJSON input/output mode.
    #[serde(default = "default_protocol_args")]
    pub protocol_args: Vec<String>,
    /// Working directory for the agent; inherits the caller's when absent.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Inherit the full parent environment. When `false` only
    /// [`ALLOWED_ENV_VARS`](crate::process::spawner::ALLOWED_ENV_VARS) pass through.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    /// Extra environment variables set on the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Session runtime tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Grace period between asking the agent to stop and force-killing it.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Longest accepted output line in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            close_grace_ms: default_close_grace_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

/// Top-level configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// How to launch the agent.
    pub agent: AgentConfig,
    /// Session tuning.
    #[serde(default)]
    pub session: SessionConfig,
}

impl RuntimeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Spawner input derived from the `[agent]` table.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            program: self.agent.program.clone(),
            args: self.agent.args.clone(),
            protocol_args: self.agent.protocol_args.clone(),
            cwd: self.agent.cwd.clone(),
            inherit_env: self.agent.inherit_env,
            env: self.agent.env.clone(),
        }
    }

    /// Default session options derived from the `[session]` table.
    ///
    /// Callbacks, hooks and MCP servers are attached by the caller afterwards.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            close_grace: Duration::from_millis(self.session.close_grace_ms),
            max_line_bytes: self.session.max_line_bytes,
            ..SessionOptions::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.agent.program.trim().is_empty() {
            return Err(AppError::Config("agent.program must not be empty".into()));
        }

        if self.session.close_grace_ms == 0 {
            return Err(AppError::Config(
                "session.close_grace_ms must be greater than zero".into(),
            ));
        }

        if self.session.max_line_bytes == 0 {
            return Err(AppError::Config(
                "session.max_line_bytes must be greater than zero".into(),
            ));
        }

        if let Some(cwd) = &self.agent.cwd {
            if !cwd.is_dir() {
                return Err(AppError::Config(format!(
                    "agent.cwd is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }
}
