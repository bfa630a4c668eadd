use clap::{Parser, Subcommand};
use platewise_core::DocRef;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "platewise", version)]
#[command(about = "Resolve Platewise identities and groups from the local replica", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: <config dir>/platewise/config.toml)
    #[arg(long, global = true, env = "PLATEWISE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding local replicas (overrides the config file)
    #[arg(long, global = true, env = "PLATEWISE_REPLICA_DIR")]
    pub replica_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Root identity commands
    #[command(subcommand)]
    Identity(IdentityCommand),

    /// Group commands
    #[command(subcommand)]
    Group(GroupCommand),

    /// Resolve the configured root and selected group
    Context,

    /// Local replica maintenance
    #[command(subcommand)]
    Replica(ReplicaCommand),
}

#[derive(Subcommand)]
pub enum IdentityCommand {
    /// Resolve and print a root identity
    Show {
        /// Root document (default: the configured one)
        root: Option<DocRef>,
    },

    /// Use another root identity document
    Set {
        /// New root document id
        root: DocRef,

        /// Confirm that local data stored for the previous root is dropped
        #[arg(long)]
        discard_local_state: bool,
    },
}

#[derive(Subcommand)]
pub enum GroupCommand {
    /// List the groups of the configured identity
    List,

    /// Load a group and make it the selected one
    Select {
        /// Group document id (must be listed in the identity)
        group: DocRef,
    },
}

#[derive(Subcommand)]
pub enum ReplicaCommand {
    /// Store a document snapshot in the local replica
    Put {
        /// Document id
        doc: DocRef,

        /// JSON file with the payload object
        file: PathBuf,

        /// Store the file verbatim instead of wrapping it as a payload
        #[arg(long)]
        raw: bool,

        /// Replica to write to (default: the configured root)
        #[arg(long)]
        root: Option<DocRef>,
    },
}
