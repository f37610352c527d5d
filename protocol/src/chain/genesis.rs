//! # Genesis Block
//!
//! The genesis block is applied exactly once at node initialization. It
//! carries no signature and no payload; the initial account balances and
//! the bootstrap delegate set travel in the header's asset slot 0,
//! encoded with the canonical codec and consumed by the module genesis
//! hooks.

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};

use super::block::{compute_transaction_root, Block, BlockHeader};

/// Header version reserved for the genesis block.
pub const GENESIS_BLOCK_VERSION: u32 = 0;

// ---------------------------------------------------------------------------
// Genesis asset
// ---------------------------------------------------------------------------

/// An account seeded at genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisAccount {
    pub address: Vec<u8>,
    pub balance: u64,
}

impl Encode for GenesisAccount {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.address);
        writer.write_u64(2, self.balance);
    }
}

impl Decode for GenesisAccount {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: reader.read_bytes(1)?,
            balance: reader.read_u64(2)?,
        })
    }
}

/// A bootstrap delegate, eligible to forge from round one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisDelegate {
    pub address: Vec<u8>,
    pub public_key: Vec<u8>,
    pub username: String,
}

impl Encode for GenesisDelegate {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.address);
        writer.write_bytes(2, &self.public_key);
        writer.write_string(3, &self.username);
    }
}

impl Decode for GenesisDelegate {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: reader.read_bytes(1)?,
            public_key: reader.read_bytes(2)?,
            username: reader.read_string(3)?,
        })
    }
}

/// The seed state carried in the genesis header's asset slot 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenesisAsset {
    pub accounts: Vec<GenesisAccount>,
    pub init_delegates: Vec<GenesisDelegate>,
}

impl Encode for GenesisAsset {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_objects(1, &self.accounts);
        writer.write_repeated_objects(2, &self.init_delegates);
    }
}

impl Decode for GenesisAsset {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            accounts: reader.read_repeated_objects(1)?,
            init_delegates: reader.read_repeated_objects(2)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Construction & validation
// ---------------------------------------------------------------------------

/// Build a genesis block from a seed asset.
///
/// Height 0, empty parent id, empty generator, empty signature, empty
/// payload. The state root is left empty; the state-root chain starts
/// from the zero digest and the genesis hooks' mutations are committed
/// like any other block's.
pub fn create_genesis_block(timestamp: u32, asset: &GenesisAsset) -> Block {
    let header = BlockHeader {
        version: GENESIS_BLOCK_VERSION,
        timestamp,
        height: 0,
        previous_block_id: Vec::new(),
        transaction_root: compute_transaction_root(&[]),
        generator_address: Vec::new(),
        state_root: Vec::new(),
        assets: vec![asset.encode_to_bytes()],
        signature: Vec::new(),
    };
    Block {
        header,
        payload: Vec::new(),
    }
}

/// Structural errors in a genesis block.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GenesisError {
    #[error("genesis block must have version {GENESIS_BLOCK_VERSION}")]
    WrongVersion,
    #[error("genesis block must be at height 0")]
    WrongHeight,
    #[error("genesis block must not have a parent")]
    HasParent,
    #[error("genesis block must have an empty payload")]
    HasPayload,
    #[error("genesis block must not be signed")]
    Signed,
    #[error("genesis block is missing its seed asset")]
    MissingAsset,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Validate genesis structure and decode the seed asset.
pub fn validate_genesis_block(block: &Block) -> Result<GenesisAsset, GenesisError> {
    if block.header.version != GENESIS_BLOCK_VERSION {
        return Err(GenesisError::WrongVersion);
    }
    if block.header.height != 0 {
        return Err(GenesisError::WrongHeight);
    }
    if !block.header.previous_block_id.is_empty() {
        return Err(GenesisError::HasParent);
    }
    if !block.payload.is_empty() {
        return Err(GenesisError::HasPayload);
    }
    if !block.header.signature.is_empty() {
        return Err(GenesisError::Signed);
    }
    let asset_bytes = block
        .header
        .assets
        .first()
        .ok_or(GenesisError::MissingAsset)?;
    Ok(GenesisAsset::decode_from_bytes(asset_bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> GenesisAsset {
        GenesisAsset {
            accounts: vec![GenesisAccount {
                address: vec![1; 20],
                balance: 1_000_000_000,
            }],
            init_delegates: vec![GenesisDelegate {
                address: vec![2; 20],
                public_key: vec![2; 32],
                username: "genesis_0".to_string(),
            }],
        }
    }

    #[test]
    fn genesis_block_validates_and_decodes_asset() {
        let block = create_genesis_block(1_700_000_000, &seed());
        let decoded = validate_genesis_block(&block).unwrap();
        assert_eq!(decoded, seed());
    }

    #[test]
    fn genesis_id_is_stable() {
        let a = create_genesis_block(1_700_000_000, &seed());
        let b = create_genesis_block(1_700_000_000, &seed());
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn rejects_nonzero_height() {
        let mut block = create_genesis_block(0, &seed());
        block.header.height = 1;
        assert_eq!(
            validate_genesis_block(&block),
            Err(GenesisError::WrongHeight)
        );
    }

    #[test]
    fn rejects_signed_genesis() {
        let mut block = create_genesis_block(0, &seed());
        block.header.signature = vec![0; 64];
        assert_eq!(validate_genesis_block(&block), Err(GenesisError::Signed));
    }

    #[test]
    fn rejects_missing_asset() {
        let mut block = create_genesis_block(0, &seed());
        block.header.assets.clear();
        assert_eq!(
            validate_genesis_block(&block),
            Err(GenesisError::MissingAsset)
        );
    }
}
