//! # Chain Domain
//!
//! Block structures, genesis handling, the active validator set, and the
//! chain module that owns the canonical tip.

pub mod block;
pub mod chain;
pub mod genesis;
pub mod validators;

pub use block::{compute_transaction_root, Block, BlockHeader};
pub use chain::{state_root_or_zero, Chain, ChainError, Slots};
pub use genesis::{
    create_genesis_block, validate_genesis_block, GenesisAccount, GenesisAsset, GenesisDelegate,
    GenesisError,
};
pub use validators::{Validator, ValidatorList, VALIDATORS_STATE_KEY};
