//! # CLI Interface
//!
//! Argument parsing for `meridian-node` via `clap` derive. One
//! subcommand, `start`, with file paths for the node configuration and
//! the genesis seed. Every flag has an environment-variable twin for
//! container deployments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Meridian validator node.
///
/// Processes blocks and transactions from peers, maintains the
/// versioned chain state, and serves the internal request bus.
#[derive(Parser, Debug)]
#[command(name = "meridian-node", about = "Meridian DPoS node", version)]
pub struct NodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Start(StartArgs),
}

/// Arguments for the `start` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StartArgs {
    /// Path to the JSON node configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the JSON genesis seed file.
    #[arg(long, value_name = "PATH")]
    pub genesis: Option<PathBuf>,

    /// Node data directory (database lives under `<dir>/db`).
    #[arg(long, env = "MERIDIAN_DATA_DIR", default_value = "~/.meridian")]
    pub data_dir: PathBuf,

    /// Network identifier as 32-byte hex. Overrides the config file.
    #[arg(long, env = "MERIDIAN_NETWORK_IDENTIFIER")]
    pub network_identifier: Option<String>,
}
