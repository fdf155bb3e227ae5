//! `artifact-receiver`: receive capture artifacts over framed TCP channels.
//!
//! ## Modes
//! - `listen`: serve one or more channels, writing payloads to `--out` until each is closed.
//! - `send`: push a file to a channel.
//! - `command`: send `CLOSE`, `ALIVE`, `FILE` or `RECORD` to a channel.

use std::time::Duration;

use anyhow::Result;
use artifact_receiver::cli::{Args, Command};
use artifact_receiver::config::ReceiverListenConfig;
use artifact_receiver::runtime;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,artifact_receiver=info")),
        )
        .init();
    let timeout = Duration::from_millis(args.timeout_ms);

    match args.cmd {
        Command::Listen { out, channels } => {
            let config = ReceiverListenConfig {
                channels: channels
                    .into_iter()
                    .map(|c| c.into_config(out.clone()))
                    .collect(),
                install_ctrlc: true,
            };
            let summaries = runtime::run_listen(config)?;
            for s in &summaries {
                tracing::info!(
                    channel = %s.channel,
                    connections = s.connections,
                    written = s.writer.written.len(),
                    failed = s.writer.failed,
                    "channel summary"
                );
            }
        }
        Command::Send { to, file } => runtime::run_send(to, &file, timeout)?,
        Command::Command { to, verb, arg } => runtime::run_command(to, verb.into(), &arg, timeout)?,
    }

    Ok(())
}
