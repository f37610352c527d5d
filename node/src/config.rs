//! # Node Configuration & Genesis Files
//!
//! JSON file formats consumed by the `start` subcommand. Parsing
//! failures here are misconfiguration: the process exits with code 2
//! before touching the database.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use meridian_protocol::chain::{
    create_genesis_block, Block, GenesisAccount, GenesisAsset, GenesisDelegate,
};
use meridian_protocol::config::NETWORK_IDENTIFIER_LENGTH;

/// The node configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Network identifier as 32-byte hex.
    pub network_identifier: Option<String>,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

impl NodeConfig {
    /// Load from a JSON file; an absent path yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed config file {}", path.display()))
    }
}

/// Decode and length-check a network identifier.
pub fn parse_network_identifier(raw: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(raw.trim()).context("network identifier is not hex")?;
    if bytes.len() != NETWORK_IDENTIFIER_LENGTH {
        bail!(
            "network identifier must be {NETWORK_IDENTIFIER_LENGTH} bytes, got {}",
            bytes.len()
        );
    }
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Genesis file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenesisAccountFile {
    address: String,
    balance: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenesisDelegateFile {
    address: String,
    public_key: String,
    username: String,
}

/// The genesis seed file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisFile {
    timestamp: u32,
    #[serde(default)]
    accounts: Vec<GenesisAccountFile>,
    #[serde(default)]
    init_delegates: Vec<GenesisDelegateFile>,
}

impl GenesisFile {
    /// Load and convert into a genesis [`Block`].
    pub fn load(path: &Path) -> Result<Block> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read genesis file {}", path.display()))?;
        let file: GenesisFile = serde_json::from_str(&raw)
            .with_context(|| format!("malformed genesis file {}", path.display()))?;

        let mut asset = GenesisAsset::default();
        for account in &file.accounts {
            asset.accounts.push(GenesisAccount {
                address: hex::decode(&account.address)
                    .with_context(|| format!("bad address for genesis account {}", account.address))?,
                balance: account.balance,
            });
        }
        for delegate in &file.init_delegates {
            asset.init_delegates.push(GenesisDelegate {
                address: hex::decode(&delegate.address)
                    .with_context(|| format!("bad address for delegate {}", delegate.username))?,
                public_key: hex::decode(&delegate.public_key)
                    .with_context(|| format!("bad public key for delegate {}", delegate.username))?,
                username: delegate.username.clone(),
            });
        }
        Ok(create_genesis_block(file.timestamp, &asset))
    }
}
