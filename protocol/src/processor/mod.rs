//! # Block Processor
//!
//! Orchestrates everything that happens to an incoming block: fork
//! choice, validation, the module hook pipeline, transaction
//! application, atomic persistence, and event publication. All mutating
//! entry points are serialized through the single-writer [`JobQueue`];
//! hooks must never re-enter the processor.
//!
//! ## Fork-status dispatch
//!
//! | status          | action                                            |
//! |-----------------|---------------------------------------------------|
//! | IdenticalBlock  | no-op                                             |
//! | Discard         | publish `chain:fork`                              |
//! | DoubleForging   | publish `chain:fork` (transport penalizes peers)  |
//! | DifferentChain  | publish `chain:fork` + `chain:sync`               |
//! | TieBreak        | delete tip, apply incoming; restore tip on failure |
//! | ValidBlock      | validate, apply                                   |
//!
//! ## Application pipeline
//!
//! ```text
//! fresh state store
//!   chain.verify_block_header      (signature, slot, eligibility)
//!   bft.verify_block_header        (finality rules)
//!   emit block:broadcast           (unless suppressed)
//!   before_block_apply hooks
//!   bft.apply_block_header
//!   per transaction: before hooks -> asset apply -> after hooks
//!   after_block_apply hooks
//!   state-root check
//!   chain.save_block               (atomic, with diff + finality)
//! ```

pub mod job_queue;

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bft::{fork_choice, BftError, FinalityTracker, ForkStatus};
use crate::bus::Bus;
use crate::chain::{
    compute_transaction_root, state_root_or_zero, validate_genesis_block, Block, BlockHeader,
    Chain, ChainError,
};
use crate::config::{BLOCK_VERSION, JOB_QUEUE_CAPACITY};
use crate::crypto::Keypair;
use crate::modules::{
    AfterBlockContext, BlockContext, GenesisContext, ModuleError, ModuleRegistry,
    TransactionContext,
};
use crate::pool::TransactionPool;
use crate::storage::{StateStore, StorageError};
use crate::transaction::{Transaction, TransactionError};

use job_queue::{JobQueue, QueueStopped};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub const EVENT_BLOCK_NEW: &str = "app:block:new";
pub const EVENT_BLOCK_DELETE: &str = "app:block:delete";
pub const EVENT_BLOCK_BROADCAST: &str = "app:block:broadcast";
pub const EVENT_CHAIN_FORK: &str = "app:chain:fork";
pub const EVENT_CHAIN_SYNC: &str = "app:chain:sync";
pub const EVENT_TRANSACTION_NEW: &str = "app:transaction:new";
pub const EVENT_ROUND_CHANGE: &str = "app:round:change";

/// Every event name the `app` channel must register (alias-relative).
pub const APP_EVENTS: &[&str] = &[
    "block:new",
    "block:delete",
    "block:broadcast",
    "chain:fork",
    "chain:sync",
    "transaction:new",
    "transaction:announce",
    "round:change",
    "network:applyPenalty",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Processor failures. `ApplyPenalty` signals that the block's source
/// peer should be penalized by the transport layer.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The block failed consensus validation; penalize the source peer.
    #[error("block failed consensus validation: {reason}")]
    ApplyPenalty { reason: String },

    /// A transaction inside the block failed; the whole block is
    /// rejected.
    #[error("transaction {tx_id} failed: {cause}")]
    TransactionApply {
        tx_id: String,
        #[source]
        cause: ModuleError,
    },

    /// The processor has been stopped.
    #[error("processor is stopped")]
    Stopped,

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Bft(#[from] BftError),

    #[error("module hook failed: {0}")]
    Module(#[source] ModuleError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<QueueStopped> for ProcessorError {
    fn from(_: QueueStopped) -> Self {
        Self::Stopped
    }
}

fn penalty(reason: impl ToString) -> ProcessorError {
    ProcessorError::ApplyPenalty {
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

struct ProcessorInner {
    chain: Arc<Chain>,
    bft: Arc<FinalityTracker>,
    registry: Arc<ModuleRegistry>,
    pool: Arc<TransactionPool>,
    bus: Arc<Bus>,
}

/// The single writer over the chain.
pub struct Processor {
    inner: Arc<ProcessorInner>,
    queue: JobQueue,
}

impl Processor {
    pub fn new(
        chain: Arc<Chain>,
        bft: Arc<FinalityTracker>,
        registry: Arc<ModuleRegistry>,
        pool: Arc<TransactionPool>,
        bus: Arc<Bus>,
    ) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                chain,
                bft,
                registry,
                pool,
                bus,
            }),
            queue: JobQueue::new(JOB_QUEUE_CAPACITY),
        }
    }

    /// Apply the genesis block. Idempotent: a chain already initialized
    /// with the same genesis is left untouched; a different genesis is
    /// refused.
    pub async fn init(&self, genesis: Block) -> Result<(), ProcessorError> {
        let inner = Arc::clone(&self.inner);
        self.queue.run(async move { inner.init_job(&genesis) }).await?
    }

    /// Process a block received from a peer. The main entry point.
    pub async fn process(
        &self,
        block: Block,
        peer_id: Option<String>,
    ) -> Result<(), ProcessorError> {
        let inner = Arc::clone(&self.inner);
        match self
            .queue
            .run(async move { inner.process_job(&block, peer_id.as_deref()) })
            .await
        {
            Ok(result) => result,
            Err(QueueStopped) => {
                debug!("process skipped: processor stopped");
                Ok(())
            }
        }
    }

    /// Apply a block that has already been validated (synchronizer
    /// path). Skips static validation; optionally clears the block's
    /// temp-table entry in the same batch.
    pub async fn process_validated(
        &self,
        block: Block,
        remove_from_temp: bool,
    ) -> Result<(), ProcessorError> {
        let inner = Arc::clone(&self.inner);
        match self
            .queue
            .run(async move { inner.apply_block(&block, remove_from_temp, false) })
            .await
        {
            Ok(result) => result,
            Err(QueueStopped) => {
                debug!("process_validated skipped: processor stopped");
                Ok(())
            }
        }
    }

    /// Delete the tip block, restoring its state diff. Fails at the
    /// finalized height.
    pub async fn delete_last_block(&self, save_temp: bool) -> Result<Block, ProcessorError> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .run(async move { inner.delete_last_block_job(save_temp) })
            .await?
    }

    /// Static transaction validity: shape, signature, and asset schema.
    /// Read-only; does not go through the job queue.
    pub fn validate_transaction(&self, transaction: &Transaction) -> Result<(), ProcessorError> {
        self.inner.validate_transaction(transaction)
    }

    /// Dry-run a batch of transactions against a caller-provided state
    /// overlay. The overlay is mutated but nothing is persisted.
    pub fn verify_transactions(
        &self,
        transactions: &[Transaction],
        state: &mut StateStore,
    ) -> Result<(), ProcessorError> {
        let next_height = self.inner.chain.last_block()?.height() + 1;
        for tx in transactions {
            self.inner
                .apply_single_transaction(tx, next_height, state)
                .map_err(|cause| ProcessorError::TransactionApply {
                    tx_id: hex::encode(tx.id()),
                    cause,
                })?;
        }
        Ok(())
    }

    /// Build and sign a block over the current tip from the given
    /// payload. Executes the full pipeline against a scratch overlay to
    /// derive the state root; nothing is persisted.
    pub fn generate_block(
        &self,
        keypair: &Keypair,
        timestamp: u32,
        payload: Vec<Transaction>,
    ) -> Result<Block, ProcessorError> {
        self.inner.generate_block(keypair, timestamp, payload)
    }

    /// Drain the job queue and refuse further submissions. The running
    /// job completes fully; no partial block writes.
    pub async fn stop(&self) {
        info!("processor stopping");
        self.queue.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

impl ProcessorInner {
    fn init_job(&self, genesis: &Block) -> Result<(), ProcessorError> {
        if self.chain.init(genesis)? {
            info!("genesis block already applied; skipping");
            return Ok(());
        }

        let asset = validate_genesis_block(genesis).map_err(ChainError::Genesis)?;
        self.chain.set_genesis_applied(genesis);

        let mut state = self.chain.new_state_store();
        for module in self.registry.modules() {
            let mut ctx = GenesisContext {
                block: genesis,
                asset: &asset,
                state: &mut state,
            };
            module
                .after_genesis_block_apply(&mut ctx)
                .map_err(ProcessorError::Module)?;
        }

        self.chain.save_block(genesis, state, 0, false)?;
        info!(id = %hex::encode(genesis.id()), "genesis block applied");
        Ok(())
    }

    fn process_job(&self, block: &Block, peer_id: Option<&str>) -> Result<(), ProcessorError> {
        let tip = self.chain.last_block()?;
        let slots = self.chain.slots()?;
        let status = fork_choice(&block.header, &tip.header, &slots);
        debug!(
            height = block.height(),
            id = %hex::encode(block.id()),
            ?status,
            "fork status computed"
        );

        match status {
            ForkStatus::IdenticalBlock => Ok(()),
            ForkStatus::Discard => {
                self.publish_fork_event(block, peer_id, "discard");
                Ok(())
            }
            ForkStatus::DoubleForging => {
                warn!(
                    generator = %hex::encode(&block.header.generator_address),
                    height = block.height(),
                    "double forging detected"
                );
                self.publish_fork_event(block, peer_id, "doubleForging");
                Ok(())
            }
            ForkStatus::DifferentChain => {
                self.publish_fork_event(block, peer_id, "differentChain");
                self.publish(
                    EVENT_CHAIN_SYNC,
                    json!({
                        "blockId": hex::encode(block.id()),
                        "height": block.height(),
                        "peerId": peer_id,
                    }),
                );
                Ok(())
            }
            ForkStatus::TieBreak => {
                self.validate(block)?;
                let previous_tip = tip.clone();
                self.delete_last_block_job(false)?;
                match self.apply_block(block, false, true) {
                    Ok(()) => Ok(()),
                    Err(error) => {
                        warn!(%error, "tie-break block failed; restoring previous tip");
                        // The restored tip was already valid; re-apply it
                        // with broadcast suppressed.
                        self.apply_block(&previous_tip, false, false)?;
                        Err(error)
                    }
                }
            }
            ForkStatus::ValidBlock => {
                self.validate(block)?;
                self.apply_block(block, false, true)
            }
        }
    }

    /// Static validation; failures are peer-penalty signals.
    fn validate(&self, block: &Block) -> Result<(), ProcessorError> {
        self.chain.validate_block(block).map_err(penalty)?;
        for tx in &block.payload {
            let asset = self
                .registry
                .asset(tx.module_id, tx.asset_id)
                .map_err(penalty)?;
            asset.validate(&tx.asset).map_err(penalty)?;
        }
        Ok(())
    }

    fn apply_block(
        &self,
        block: &Block,
        remove_from_temp: bool,
        broadcast: bool,
    ) -> Result<(), ProcessorError> {
        let tip = self.chain.last_block()?;
        let mut state = self.chain.new_state_store();

        self.chain.verify_block_header(block, &mut state)?;
        self.bft.verify_block_header(&block.header)?;

        if broadcast {
            self.publish(
                EVENT_BLOCK_BROADCAST,
                json!({
                    "id": hex::encode(block.id()),
                    "height": block.height(),
                }),
            );
        }

        for module in self.registry.modules() {
            let mut ctx = BlockContext {
                block,
                state: &mut state,
                reducers: self.registry.reducer_handler(),
            };
            module
                .before_block_apply(&mut ctx)
                .map_err(ProcessorError::Module)?;
        }

        let validator_count = self.chain.active_validators(&mut state)?.len();
        let finalized_height = self.bft.apply_block_header(&block.header, validator_count);

        for tx in &block.payload {
            self.apply_single_transaction(tx, block.height(), &mut state)
                .map_err(|cause| ProcessorError::TransactionApply {
                    tx_id: hex::encode(tx.id()),
                    cause,
                })?;
        }

        let mut after_ctx = AfterBlockContext {
            block,
            previous_timestamp: tip.header.timestamp,
            slots: self.chain.slots()?,
            state: &mut state,
            reducers: self.registry.reducer_handler(),
            events: Vec::new(),
        };
        for module in self.registry.modules() {
            module
                .after_block_apply(&mut after_ctx)
                .map_err(ProcessorError::Module)?;
        }
        let module_events = after_ctx.events;

        let parent_root = state_root_or_zero(&tip.header.state_root);
        let computed_root = state.compute_root(&parent_root);
        if block.header.state_root != computed_root {
            return Err(penalty(ChainError::StateRootMismatch));
        }

        self.chain
            .save_block(block, state, finalized_height, remove_from_temp)?;
        self.pool.mark_included(&block.payload);

        info!(
            height = block.height(),
            id = %hex::encode(block.id()),
            transactions = block.payload.len(),
            finalized = finalized_height,
            "block applied"
        );
        self.publish(
            EVENT_BLOCK_NEW,
            json!({
                "id": hex::encode(block.id()),
                "height": block.height(),
                "numberOfTransactions": block.payload.len(),
            }),
        );
        for (name, payload) in module_events {
            self.publish(&format!("app:{name}"), payload);
        }
        Ok(())
    }

    fn delete_last_block_job(&self, save_temp: bool) -> Result<Block, ProcessorError> {
        let tip = self.chain.last_block()?;
        let state = self.chain.new_state_store();
        self.chain.remove_block(&tip, state, save_temp)?;
        self.bft.remove_block_header(tip.height());
        // Deleted payload returns to the pool so the transactions are
        // not lost to a reorg.
        self.pool.return_to_pool(&tip.payload);

        info!(
            height = tip.height(),
            id = %hex::encode(tip.id()),
            "block deleted"
        );
        self.publish(
            EVENT_BLOCK_DELETE,
            json!({
                "id": hex::encode(tip.id()),
                "height": tip.height(),
            }),
        );
        Ok(tip)
    }

    fn apply_single_transaction(
        &self,
        tx: &Transaction,
        block_height: u32,
        state: &mut StateStore,
    ) -> Result<(), ModuleError> {
        let sender_address = tx.sender_address();

        for module in self.registry.modules() {
            let mut ctx = TransactionContext {
                transaction: tx,
                sender_address: sender_address.clone(),
                block_height,
                state: &mut *state,
                reducers: self.registry.reducer_handler(),
            };
            module.before_transaction_apply(&mut ctx)?;
        }

        let asset = self.registry.asset(tx.module_id, tx.asset_id)?;
        let mut ctx = TransactionContext {
            transaction: tx,
            sender_address: sender_address.clone(),
            block_height,
            state: &mut *state,
            reducers: self.registry.reducer_handler(),
        };
        asset.apply(&mut ctx)?;

        for module in self.registry.modules() {
            let mut ctx = TransactionContext {
                transaction: tx,
                sender_address: sender_address.clone(),
                block_height,
                state: &mut *state,
                reducers: self.registry.reducer_handler(),
            };
            module.after_transaction_apply(&mut ctx)?;
        }
        Ok(())
    }

    fn validate_transaction(&self, tx: &Transaction) -> Result<(), ProcessorError> {
        tx.validate(self.chain.network_identifier())?;
        let asset = self
            .registry
            .asset(tx.module_id, tx.asset_id)
            .map_err(ProcessorError::Module)?;
        asset.validate(&tx.asset).map_err(ProcessorError::Module)?;
        Ok(())
    }

    fn generate_block(
        &self,
        keypair: &Keypair,
        timestamp: u32,
        payload: Vec<Transaction>,
    ) -> Result<Block, ProcessorError> {
        let tip = self.chain.last_block()?;
        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                timestamp,
                height: tip.height() + 1,
                previous_block_id: tip.id(),
                transaction_root: compute_transaction_root(&payload),
                generator_address: keypair.address(),
                state_root: Vec::new(),
                assets: Vec::new(),
                signature: Vec::new(),
            },
            payload,
        };

        // Execute against a scratch overlay to derive the state root;
        // the overlay is dropped, never committed.
        let mut state = self.chain.new_state_store();
        for module in self.registry.modules() {
            let mut ctx = BlockContext {
                block: &block,
                state: &mut state,
                reducers: self.registry.reducer_handler(),
            };
            module
                .before_block_apply(&mut ctx)
                .map_err(ProcessorError::Module)?;
        }
        for tx in &block.payload {
            self.apply_single_transaction(tx, block.height(), &mut state)
                .map_err(|cause| ProcessorError::TransactionApply {
                    tx_id: hex::encode(tx.id()),
                    cause,
                })?;
        }
        let mut after_ctx = AfterBlockContext {
            block: &block,
            previous_timestamp: tip.header.timestamp,
            slots: self.chain.slots()?,
            state: &mut state,
            reducers: self.registry.reducer_handler(),
            events: Vec::new(),
        };
        for module in self.registry.modules() {
            module
                .after_block_apply(&mut after_ctx)
                .map_err(ProcessorError::Module)?;
        }

        let parent_root = state_root_or_zero(&tip.header.state_root);
        block.header.state_root = state.compute_root(&parent_root).to_vec();
        block
            .header
            .sign(self.chain.network_identifier(), keypair);
        Ok(block)
    }

    fn publish_fork_event(&self, block: &Block, peer_id: Option<&str>, status: &str) {
        self.publish(
            EVENT_CHAIN_FORK,
            json!({
                "id": hex::encode(block.id()),
                "height": block.height(),
                "generatorAddress": hex::encode(&block.header.generator_address),
                "status": status,
                "peerId": peer_id,
            }),
        );
    }

    fn publish(&self, event: &str, payload: Value) {
        if let Err(error) = self.bus.publish(event, &payload) {
            warn!(event, %error, "event publication failed");
        }
    }
}
