//! Command-line interface for platewise.

mod args;
mod context;
mod group;
mod identity;
mod replica;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use platewise_core::{BackoffConfig, ContextLoader, DocRef, ResolveError, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CliConfig, ConfigError};
use crate::replica_store::ReplicaStore;

use args::{Cli, Commands};

/// Errors surfaced to the user.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No root identity configured. Set one with: platewise identity set <root-doc-id>")]
    NoRoot,
    #[error("No group selected. Pick one with: platewise group select <group-doc-id>")]
    NoGroup,
    #[error(
        "Replacing root {from} with {to} discards everything stored locally for {from}. \
         Re-run with --discard-local-state to confirm"
    )]
    RootChangeNotAcknowledged { from: DocRef, to: DocRef },
    #[error("Failed to read {path}: {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Input is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Loaded configuration plus what commands need to reach the replica.
pub struct Workspace {
    config_path: PathBuf,
    config: CliConfig,
    replica_base: PathBuf,
    backoff: BackoffConfig,
    poll_interval: Duration,
}

impl Workspace {
    pub fn new(config_path: PathBuf, config: CliConfig, backoff: BackoffConfig) -> Self {
        Self {
            config_path,
            replica_base: config.replica_dir.clone(),
            config,
            backoff,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Load the config at `config_path` (or the default location).
    pub fn open(
        config_path: Option<PathBuf>,
        replica_override: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config_path = match config_path {
            Some(path) => path,
            None => CliConfig::default_path().ok_or(ConfigError::NoConfigDir)?,
        };
        let config = CliConfig::load(&config_path)?;
        let mut workspace = Self::new(config_path, config, BackoffConfig::from_env());
        if let Some(dir) = replica_override {
            workspace.replica_base = dir;
        }
        debug!(
            "Config {:?}, replicas under {:?}",
            workspace.config_path, workspace.replica_base
        );
        Ok(workspace)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    pub fn save(&self) -> Result<(), CliError> {
        Ok(self.config.save(&self.config_path)?)
    }

    pub fn root(&self) -> Result<&DocRef, CliError> {
        self.config.root_doc_id.as_ref().ok_or(CliError::NoRoot)
    }

    pub fn replica(&self, root: &DocRef) -> ReplicaStore {
        ReplicaStore::for_root(&self.replica_base, root).with_poll_interval(self.poll_interval)
    }

    pub fn loader(&self, root: &DocRef) -> ContextLoader {
        ContextLoader::new(Arc::new(self.replica(root)), self.backoff.clone())
    }
}

/// Parse arguments, run the command and map the outcome to an exit code.
pub async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = match Workspace::open(cli.config, cli.replica_dir) {
        Ok(mut workspace) => dispatch(cli.command, &mut workspace, &cancel).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(Status::Done) => ExitCode::SUCCESS,
        Ok(Status::Pending) => {
            eprintln!("Not replicated yet. Try again once this device has synced.");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// How a command ended when it did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum Status {
    Done,
    Pending,
}

async fn dispatch(
    command: Commands,
    workspace: &mut Workspace,
    cancel: &CancellationToken,
) -> Result<Status, CliError> {
    match command {
        Commands::Identity(cmd) => identity::handle(cmd, workspace, cancel).await,
        Commands::Group(cmd) => group::handle(cmd, workspace, cancel).await,
        Commands::Context => context::handle(workspace, cancel).await,
        Commands::Replica(cmd) => replica::handle(cmd, workspace).await,
    }
}
