//! Platewise command-line agent.

mod cli;
mod config;
mod replica_store;

use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output stays pipeable.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("PLATEWISE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run_cli().await
}
