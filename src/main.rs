#![forbid(unsafe_code)]

//! `agent-conduit`: run one single-turn agent session from a TOML config.
//!
//! Every agent message is printed to stdout as one JSON line; logs go to
//! stderr. Ctrl-C interrupts the agent; a second Ctrl-C closes the session.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use agent_conduit::logging::{init_tracing, LogFormat};
use agent_conduit::{AppError, Result, RuntimeConfig, Session};

#[derive(Debug, Parser)]
#[command(name = "agent-conduit", about = "Drive an agent process over NDJSON stdio", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Prompt sent as the single user turn.
    #[arg(long)]
    prompt: String,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = RuntimeConfig::load_from_path(&args.config)?;
    info!(program = %config.agent.program, "configuration loaded");

    let abort = CancellationToken::new();
    let options = config.session_options().with_abort(abort.clone());
    let session = Session::start(&config.spawn_config(), options, args.prompt.as_str())?;

    let signals = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, asking agent to stop");
            abort.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt received, closing session");
            signals.close().await;
        }
    });

    let mut outcome = Ok(());
    let mut messages = session.messages();
    while let Some(message) = messages.next().await {
        match message {
            Ok(message) => print_line(&message)?,
            Err(err) => {
                error!(%err, "session ended with error");
                outcome = Err(err);
            }
        }
    }

    session.close().await;
    info!("session closed");
    outcome
}

fn print_line(message: &serde_json::Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, message)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}
