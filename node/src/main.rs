// Copyright (c) 2026 Meridian Labs. MIT License.
// See LICENSE for details.

//! # Meridian Node
//!
//! Entry point for the `meridian-node` binary. Wires the protocol core
//! together, applies the genesis block, registers the bus channel, and
//! runs until interrupted.
//!
//! Exit codes: 0 clean shutdown, 1 fatal runtime error, 2
//! misconfiguration.

mod cli;
mod config;
mod logging;
mod rpc;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use meridian_protocol::bft::FinalityTracker;
use meridian_protocol::bus::Bus;
use meridian_protocol::chain::{Block, Chain};
use meridian_protocol::modules::{dpos::DposModule, token::TokenModule, ModuleRegistry};
use meridian_protocol::pool::{Broadcaster, TransactionPool};
use meridian_protocol::processor::Processor;
use meridian_protocol::storage::KvStore;
use meridian_protocol::transport::{NoopPeerClient, Transport};

use cli::{Commands, NodeCli, StartArgs};
use config::{parse_network_identifier, GenesisFile, NodeConfig};

fn main() -> ExitCode {
    let cli = NodeCli::parse();
    let Commands::Start(args) = cli.command;

    logging::init_logging();

    // Everything that can be wrong about the configuration is decided
    // before the runtime starts.
    let setup = match load_setup(&args) {
        Ok(setup) => setup,
        Err(error) => {
            error!(%error, "misconfiguration");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(setup)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "fatal");
            ExitCode::from(1)
        }
    }
}

/// Validated startup inputs.
struct Setup {
    data_dir: std::path::PathBuf,
    network_identifier: Vec<u8>,
    genesis: Block,
}

fn load_setup(args: &StartArgs) -> Result<Setup> {
    let file_config = NodeConfig::load(args.config.as_deref())?;

    let network_identifier = args
        .network_identifier
        .clone()
        .or(file_config.network_identifier)
        .context("network identifier missing: set --network-identifier, MERIDIAN_NETWORK_IDENTIFIER, or the config file")?;
    let network_identifier = parse_network_identifier(&network_identifier)?;

    let genesis_path = args
        .genesis
        .clone()
        .context("genesis file missing: pass --genesis PATH")?;
    let genesis = GenesisFile::load(&genesis_path)?;

    let data_dir = file_config.data_dir.unwrap_or_else(|| args.data_dir.clone());
    Ok(Setup {
        data_dir,
        network_identifier,
        genesis,
    })
}

async fn run(setup: Setup) -> Result<()> {
    let db_path = setup.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("cannot create data directory {}", db_path.display()))?;

    let kv = Arc::new(KvStore::open(&db_path)?);
    info!(path = %db_path.display(), "database opened");

    // -- Core wiring ---------------------------------------------------------
    let chain = Arc::new(Chain::new(Arc::clone(&kv), setup.network_identifier));
    let finalized = chain.data_access().finalized_height()?.unwrap_or(0);
    let bft = Arc::new(FinalityTracker::new(finalized));

    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(TokenModule))?;
    registry.register(Arc::new(DposModule))?;
    let registry = Arc::new(registry);

    let bus = Arc::new(Bus::new());
    let pool = Arc::new(TransactionPool::default());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&pool), Arc::clone(&bus)));

    let processor = Arc::new(Processor::new(
        Arc::clone(&chain),
        Arc::clone(&bft),
        Arc::clone(&registry),
        Arc::clone(&pool),
        Arc::clone(&bus),
    ));
    let transport = Arc::new(Transport::new(
        Arc::clone(&chain),
        Arc::clone(&pool),
        Arc::clone(&broadcaster),
        Arc::clone(&processor),
        Arc::clone(&bus),
        Arc::new(NoopPeerClient),
    ));

    rpc::register_app_channel(&bus, Arc::clone(&chain), Arc::clone(&transport))?;

    // -- Genesis -------------------------------------------------------------
    processor.init(setup.genesis).await?;
    let tip = chain.last_block()?;
    info!(height = tip.height(), id = %hex::encode(tip.id()), "chain ready");

    // -- Background tasks ----------------------------------------------------
    let announcer = broadcaster.start();

    // -- Run until interrupted ----------------------------------------------
    signal::ctrl_c().await.context("signal handler failed")?;
    info!("shutdown requested");

    announcer.abort();
    processor.stop().await;
    info!("shutdown complete");
    Ok(())
}
