//! # Chain Module
//!
//! Owns the canonical chain tip and the rules a block header must satisfy
//! to extend it. Persistence is delegated to [`BlockStorage`]; the chain
//! adds tip bookkeeping, slot arithmetic, and the two-stage header check:
//!
//! - `validate_block` — static structure: version, sizes, transaction
//!   root, per-transaction static validity. No chain state required.
//! - `verify_block_header` — contextual: height continuity, parent id,
//!   slot ordering, generator eligibility for the slot, and the
//!   generator's signature against the active validator set.
//!
//! The tip is only ever swapped by the processor's single writer; readers
//! take a cheap clone under the lock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::codec::{Decode, Encode};
use crate::config::{BLOCK_TIME, BLOCK_VERSION, MAX_PAYLOAD_LENGTH, MAX_TRANSACTIONS_PER_BLOCK};
use crate::crypto::{PublicKey, Signature};
use crate::storage::{BlockStorage, KvStore, StateStore, StorageError};
use crate::transaction::TransactionError;

use super::block::{compute_transaction_root, Block};
use super::genesis::GenesisError;
use super::validators::{ValidatorList, VALIDATORS_STATE_KEY};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised while validating, verifying, or persisting blocks.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unexpected block version {got}, expected {expected}")]
    InvalidVersion { expected: u32, got: u32 },

    #[error("previous block id must be 32 bytes")]
    MalformedPreviousId,

    #[error("block payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("block carries {got} transactions, maximum is {max}")]
    TooManyTransactions { max: usize, got: usize },

    #[error("transaction root does not match payload")]
    TransactionRootMismatch,

    #[error("invalid transaction in payload: {0}")]
    Transaction(#[from] TransactionError),

    #[error("expected height {expected}, got {got}")]
    HeightDiscontinuity { expected: u32, got: u32 },

    #[error("previous block id does not match the chain tip")]
    PreviousIdMismatch,

    #[error("block slot {block_slot} does not follow tip slot {tip_slot}")]
    SlotNotAfterTip { block_slot: u64, tip_slot: u64 },

    #[error("block slot {block_slot} is in the future (current slot {current_slot})")]
    SlotInFuture { block_slot: u64, current_slot: u64 },

    #[error("generator is not eligible for this slot")]
    IneligibleGenerator,

    #[error("no active validator set")]
    UnknownValidators,

    #[error("block signature verification failed")]
    InvalidBlockSignature,

    #[error("state root does not match the applied state")]
    StateRootMismatch,

    #[error("genesis block mismatch: chain already initialized with a different genesis")]
    GenesisMismatch,

    #[error("chain is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Genesis(#[from] GenesisError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Slot arithmetic anchored at the genesis timestamp. Each slot is one
/// [`BLOCK_TIME`] window in which exactly one delegate may forge.
#[derive(Debug, Clone, Copy)]
pub struct Slots {
    genesis_timestamp: u32,
}

impl Slots {
    pub fn new(genesis_timestamp: u32) -> Self {
        Self { genesis_timestamp }
    }

    /// Slot number containing `timestamp`. Timestamps before genesis
    /// clamp to slot 0.
    pub fn slot_number(&self, timestamp: u32) -> u64 {
        u64::from(timestamp.saturating_sub(self.genesis_timestamp)) / u64::from(BLOCK_TIME)
    }

    /// First second of a slot.
    pub fn slot_timestamp(&self, slot: u64) -> u32 {
        self.genesis_timestamp + (slot * u64::from(BLOCK_TIME)) as u32
    }

    /// Slot containing the current wall-clock time.
    pub fn current_slot(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.slot_number(now.min(u64::from(u32::MAX)) as u32)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Canonical chain state: tip, slots, and header rules.
#[derive(Debug)]
pub struct Chain {
    storage: BlockStorage,
    kv: Arc<KvStore>,
    network_identifier: Vec<u8>,
    tip: RwLock<Option<Block>>,
    slots: RwLock<Option<Slots>>,
}

impl Chain {
    pub fn new(kv: Arc<KvStore>, network_identifier: Vec<u8>) -> Self {
        Self {
            storage: BlockStorage::new(Arc::clone(&kv)),
            kv,
            network_identifier,
            tip: RwLock::new(None),
            slots: RwLock::new(None),
        }
    }

    /// Read-only access to persisted blocks and transactions.
    pub fn data_access(&self) -> &BlockStorage {
        &self.storage
    }

    /// The network identifier blocks and transactions are signed against.
    pub fn network_identifier(&self) -> &[u8] {
        &self.network_identifier
    }

    /// A fresh state overlay over the current committed state.
    pub fn new_state_store(&self) -> StateStore {
        StateStore::new(Arc::clone(&self.kv))
    }

    /// Slot arithmetic. Available once the chain is initialized.
    pub fn slots(&self) -> Result<Slots, ChainError> {
        (*self.slots.read()).ok_or(ChainError::NotInitialized)
    }

    /// The current tip. Available once the chain is initialized.
    pub fn last_block(&self) -> Result<Block, ChainError> {
        self.tip.read().clone().ok_or(ChainError::NotInitialized)
    }

    /// The finalized height as persisted by the last save.
    pub fn finalized_height(&self) -> Result<u32, ChainError> {
        Ok(self.storage.finalized_height()?.unwrap_or(0))
    }

    /// Parent state root for chaining: the tip's root, or the zero digest
    /// when the parent predates state roots (genesis).
    pub fn parent_state_root(&self) -> Result<[u8; 32], ChainError> {
        let tip = self.last_block()?;
        Ok(state_root_or_zero(&tip.header.state_root))
    }

    // -- Initialization -------------------------------------------------------

    /// Restore tip and slots from storage after a restart.
    ///
    /// Returns `true` when the chain already contains the given genesis
    /// block (init is then a no-op for the caller), `false` when the
    /// database is empty. A database initialized with a *different*
    /// genesis is refused.
    pub fn init(&self, genesis: &Block) -> Result<bool, ChainError> {
        match self.storage.get_block_id_at_height(0) {
            Ok(stored_id) => {
                if stored_id != genesis.id() {
                    return Err(ChainError::GenesisMismatch);
                }
                let last = self.load_last_block()?;
                debug!(height = last.height(), "chain restored from storage");
                *self.slots.write() = Some(Slots::new(genesis.header.timestamp));
                *self.tip.write() = Some(last);
                Ok(true)
            }
            Err(StorageError::NotFound) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Install slots and tip straight from an applied genesis block.
    pub(crate) fn set_genesis_applied(&self, genesis: &Block) {
        *self.slots.write() = Some(Slots::new(genesis.header.timestamp));
        *self.tip.write() = Some(genesis.clone());
    }

    fn load_last_block(&self) -> Result<Block, ChainError> {
        let gte = crate::storage::keys::blocks_height(0);
        let lte = crate::storage::keys::blocks_height(u32::MAX);
        let top = self.kv.range(&gte, &lte, true, Some(1))?;
        let (_, id) = top.first().ok_or(StorageError::NotFound)?;
        Ok(self.storage.get_block_by_id(id)?)
    }

    // -- Validation -----------------------------------------------------------

    /// Static block validity: structure, sizes, transaction root, and
    /// per-transaction static checks. Requires no chain state.
    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        if block.header.version != BLOCK_VERSION {
            return Err(ChainError::InvalidVersion {
                expected: BLOCK_VERSION,
                got: block.header.version,
            });
        }
        if block.header.previous_block_id.len() != 32 {
            return Err(ChainError::MalformedPreviousId);
        }
        if block.payload.len() > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(ChainError::TooManyTransactions {
                max: MAX_TRANSACTIONS_PER_BLOCK,
                got: block.payload.len(),
            });
        }
        let payload_size: usize = block
            .payload
            .iter()
            .map(|tx| tx.encode_to_bytes().len())
            .sum();
        if payload_size > MAX_PAYLOAD_LENGTH {
            return Err(ChainError::PayloadTooLarge {
                max: MAX_PAYLOAD_LENGTH,
            });
        }
        if block.header.transaction_root != compute_transaction_root(&block.payload) {
            return Err(ChainError::TransactionRootMismatch);
        }
        for tx in &block.payload {
            tx.validate(&self.network_identifier)?;
        }
        Ok(())
    }

    /// Contextual header verification against the current tip and the
    /// active validator set: continuity, slot ordering, generator
    /// eligibility, and the generator signature.
    pub fn verify_block_header(
        &self,
        block: &Block,
        state: &mut StateStore,
    ) -> Result<(), ChainError> {
        let tip = self.last_block()?;
        let slots = self.slots()?;

        if block.header.height != tip.height() + 1 {
            return Err(ChainError::HeightDiscontinuity {
                expected: tip.height() + 1,
                got: block.header.height,
            });
        }
        if block.header.previous_block_id != tip.id() {
            return Err(ChainError::PreviousIdMismatch);
        }

        let block_slot = slots.slot_number(block.header.timestamp);
        let tip_slot = slots.slot_number(tip.header.timestamp);
        if block_slot <= tip_slot && tip.height() > 0 {
            return Err(ChainError::SlotNotAfterTip {
                block_slot,
                tip_slot,
            });
        }
        let current_slot = slots.current_slot();
        if block_slot > current_slot {
            return Err(ChainError::SlotInFuture {
                block_slot,
                current_slot,
            });
        }

        let validators = self.active_validators(state)?;
        let expected = validators
            .for_slot(block_slot)
            .ok_or(ChainError::UnknownValidators)?;
        if expected.address != block.header.generator_address {
            return Err(ChainError::IneligibleGenerator);
        }

        let public_key = PublicKey::from_bytes(&expected.public_key)
            .map_err(|_| ChainError::InvalidBlockSignature)?;
        let message = block.header.signing_bytes(&self.network_identifier);
        let signature = Signature::from_bytes(block.header.signature.clone());
        if !public_key.verify(&message, &signature) {
            return Err(ChainError::InvalidBlockSignature);
        }
        Ok(())
    }

    /// The active validator set, read through the given state overlay.
    pub fn active_validators(&self, state: &mut StateStore) -> Result<ValidatorList, ChainError> {
        match state.get_chain_state(VALIDATORS_STATE_KEY)? {
            Some(bytes) => Ok(ValidatorList::decode_from_bytes(&bytes)
                .map_err(StorageError::Corrupted)?),
            None => Err(ChainError::UnknownValidators),
        }
    }

    // -- Persistence ----------------------------------------------------------

    /// Persist a block and swap the tip to it.
    pub fn save_block(
        &self,
        block: &Block,
        state: StateStore,
        finalized_height: u32,
        remove_from_temp: bool,
    ) -> Result<(), ChainError> {
        self.storage
            .save_block(block, state, finalized_height, remove_from_temp)?;
        *self.tip.write() = Some(block.clone());
        Ok(())
    }

    /// Remove the tip block, restore its state diff, and swap the tip to
    /// its parent.
    pub fn remove_block(
        &self,
        block: &Block,
        state: StateStore,
        save_temp: bool,
    ) -> Result<(), ChainError> {
        let parent = self
            .storage
            .get_block_by_id(&block.header.previous_block_id)?;
        self.storage.delete_block(block, state, save_temp)?;
        *self.tip.write() = Some(parent);
        Ok(())
    }
}

/// A stored state root, or the zero digest when the field is empty.
pub fn state_root_or_zero(state_root: &[u8]) -> [u8; 32] {
    state_root.try_into().unwrap_or([0u8; 32])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
