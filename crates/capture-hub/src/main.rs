//! `capture-hub`: synchronise recording sessions across capture devices.
//!
//! Reads a TOML config (see `config.rs`), validates the enabled backends, then accepts
//! `verb:argument` session commands on the control bind address.

use anyhow::Result;
use capture_hub::cli::Args;
use capture_hub::startup;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,capture_hub=info,artifact_receiver=info")),
        )
        .init();

    startup::run(args).await
}
