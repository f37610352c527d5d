//! # Module Registry & Hook Pipeline
//!
//! A module is a capability bundle: an id, a name, transaction assets
//! (schema + validate + apply), named reducers callable from other
//! modules, and lifecycle hooks. There is no base class; modules are
//! trait objects with no-op hook defaults, and the registry owns the
//! ordered pipeline.
//!
//! Hooks run in registration order at five points of block application:
//!
//! ```text
//! after_genesis_block_apply        (once, at init)
//! before_block_apply
//!   before_transaction_apply       (per transaction)
//!   <asset apply>
//!   after_transaction_apply
//! after_block_apply
//! ```
//!
//! Any hook error aborts the surrounding operation; hooks cannot swallow
//! errors.
//!
//! ## Reducers
//!
//! Cross-module calls are dispatched by `"<module>:<func>"` name through
//! the [`ReducerHandler`]; exactly one colon, both segments non-empty.
//! Dispatch is a string-keyed map built at registration time. Parameters
//! and results are JSON values, with byte fields hex-encoded.

pub mod dpos;
pub mod token;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::chain::{Block, GenesisAsset, Slots, ValidatorList, VALIDATORS_STATE_KEY};
use crate::codec::{CodecError, Decode, Encode};
use crate::storage::{StateStore, StorageError};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised by module hooks, asset application, and reducers.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {0} is already registered")]
    DuplicateModule(String),

    #[error("unknown asset {asset_id} for module {module_id}")]
    UnknownAsset { module_id: u32, asset_id: u32 },

    #[error("unknown reducer: {0}")]
    UnknownReducer(String),

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("invalid reducer parameters: {0}")]
    InvalidParams(String),

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("{0}")]
    Apply(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Reducers
// ---------------------------------------------------------------------------

/// Reducer parameters and results travel as JSON values.
pub type ReducerValue = serde_json::Value;

/// A registered cross-module callable.
pub type Reducer =
    Arc<dyn Fn(&ReducerValue, &mut StateStore) -> Result<ReducerValue, ModuleError> + Send + Sync>;

/// Dispatches `"<module>:<func>"` reducer calls against the registry's
/// reducer map.
#[derive(Clone, Copy)]
pub struct ReducerHandler<'a> {
    reducers: &'a HashMap<String, Reducer>,
}

impl ReducerHandler<'_> {
    /// Invoke a reducer by name.
    ///
    /// The name must contain exactly one colon separating two non-empty
    /// segments; anything else is an [`ModuleError::UnknownReducer`].
    pub fn invoke(
        &self,
        name: &str,
        params: &ReducerValue,
        state: &mut StateStore,
    ) -> Result<ReducerValue, ModuleError> {
        let mut segments = name.split(':');
        let module = segments.next().unwrap_or("");
        let func = segments.next().unwrap_or("");
        if module.is_empty() || func.is_empty() || segments.next().is_some() {
            return Err(ModuleError::UnknownReducer(name.to_string()));
        }
        let reducer = self
            .reducers
            .get(name)
            .ok_or_else(|| ModuleError::UnknownReducer(name.to_string()))?;
        reducer(params, state)
    }
}

// ---------------------------------------------------------------------------
// Hook contexts
// ---------------------------------------------------------------------------

/// Context for the one-time genesis hook.
pub struct GenesisContext<'a> {
    pub block: &'a Block,
    pub asset: &'a GenesisAsset,
    pub state: &'a mut StateStore,
}

/// Context for `before_block_apply`.
pub struct BlockContext<'a> {
    pub block: &'a Block,
    pub state: &'a mut StateStore,
    pub reducers: ReducerHandler<'a>,
}

/// Context for `after_block_apply`. Adds the consensus surface modules
/// use to rotate the validator set, plus deferred event collection.
pub struct AfterBlockContext<'a> {
    pub block: &'a Block,
    /// Timestamp of the parent block, for missed-slot accounting.
    pub previous_timestamp: u32,
    pub slots: Slots,
    pub state: &'a mut StateStore,
    pub reducers: ReducerHandler<'a>,
    /// Events queued by hooks; the processor publishes them on the bus
    /// after the block is saved, in queue order.
    pub events: Vec<(String, ReducerValue)>,
}

impl AfterBlockContext<'_> {
    /// The active validator set, through the block's state overlay.
    pub fn validators(&mut self) -> Result<ValidatorList, ModuleError> {
        match self.state.get_chain_state(VALIDATORS_STATE_KEY)? {
            Some(bytes) => Ok(ValidatorList::decode_from_bytes(&bytes)?),
            None => Ok(ValidatorList::default()),
        }
    }

    /// Replace the active validator set.
    pub fn set_validators(&mut self, validators: &ValidatorList) -> Result<(), ModuleError> {
        self.state
            .set_chain_state(VALIDATORS_STATE_KEY, validators.encode_to_bytes())?;
        Ok(())
    }

    /// Queue an event for publication once the block is committed.
    pub fn emit(&mut self, name: &str, payload: ReducerValue) {
        self.events.push((name.to_string(), payload));
    }
}

/// Context for the per-transaction hooks and asset application.
pub struct TransactionContext<'a> {
    pub transaction: &'a Transaction,
    /// Address derived from the transaction's sender public key.
    pub sender_address: Vec<u8>,
    /// Height of the block containing the transaction.
    pub block_height: u32,
    pub state: &'a mut StateStore,
    pub reducers: ReducerHandler<'a>,
}

// ---------------------------------------------------------------------------
// Module traits
// ---------------------------------------------------------------------------

/// One transaction asset: its id within the module, static validation of
/// the asset bytes, and the state transition.
pub trait TransactionAsset: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &'static str;

    /// Static checks over the decoded asset. No state access.
    fn validate(&self, asset_bytes: &[u8]) -> Result<(), ModuleError>;

    /// Decode the asset bytes and mutate state. Runs between the before-
    /// and after-transaction hook points.
    fn apply(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ModuleError>;
}

/// A chain module: id, name, assets, reducers, lifecycle hooks.
/// Hook defaults are no-ops so modules implement only what they need.
pub trait ChainModule: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &'static str;

    fn transaction_assets(&self) -> Vec<Arc<dyn TransactionAsset>> {
        Vec::new()
    }

    fn reducers(&self) -> Vec<(&'static str, Reducer)> {
        Vec::new()
    }

    fn after_genesis_block_apply(&self, _ctx: &mut GenesisContext<'_>) -> Result<(), ModuleError> {
        Ok(())
    }

    fn before_block_apply(&self, _ctx: &mut BlockContext<'_>) -> Result<(), ModuleError> {
        Ok(())
    }

    fn after_block_apply(&self, _ctx: &mut AfterBlockContext<'_>) -> Result<(), ModuleError> {
        Ok(())
    }

    fn before_transaction_apply(
        &self,
        _ctx: &mut TransactionContext<'_>,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    fn after_transaction_apply(
        &self,
        _ctx: &mut TransactionContext<'_>,
    ) -> Result<(), ModuleError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owns the registered modules in registration order, plus the asset and
/// reducer dispatch tables built from them.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ChainModule>>,
    assets: HashMap<(u32, u32), Arc<dyn TransactionAsset>>,
    reducers: HashMap<String, Reducer>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Fails on id or name collision, and on reducer
    /// name collision within the module's namespace.
    pub fn register(&mut self, module: Arc<dyn ChainModule>) -> Result<(), ModuleError> {
        if self
            .modules
            .iter()
            .any(|m| m.id() == module.id() || m.name() == module.name())
        {
            return Err(ModuleError::DuplicateModule(module.name().to_string()));
        }

        for asset in module.transaction_assets() {
            let key = (module.id(), asset.id());
            if self.assets.insert(key, asset).is_some() {
                return Err(ModuleError::DuplicateModule(format!(
                    "{}: duplicate asset id {}",
                    module.name(),
                    key.1
                )));
            }
        }

        for (func, reducer) in module.reducers() {
            let name = format!("{}:{}", module.name(), func);
            if self.reducers.insert(name.clone(), reducer).is_some() {
                return Err(ModuleError::DuplicateModule(format!(
                    "duplicate reducer {name}"
                )));
            }
        }

        self.modules.push(module);
        Ok(())
    }

    /// Registered modules, in registration order.
    pub fn modules(&self) -> &[Arc<dyn ChainModule>] {
        &self.modules
    }

    /// Asset lookup by `(module_id, asset_id)`.
    pub fn asset(
        &self,
        module_id: u32,
        asset_id: u32,
    ) -> Result<&Arc<dyn TransactionAsset>, ModuleError> {
        self.assets
            .get(&(module_id, asset_id))
            .ok_or(ModuleError::UnknownAsset {
                module_id,
                asset_id,
            })
    }

    /// A handler over the registry's reducer table.
    pub fn reducer_handler(&self) -> ReducerHandler<'_> {
        ReducerHandler {
            reducers: &self.reducers,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON parameter helpers
// ---------------------------------------------------------------------------

/// Extract a hex-encoded byte field from reducer parameters.
pub(crate) fn param_bytes(params: &ReducerValue, field: &str) -> Result<Vec<u8>, ModuleError> {
    let value = params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ModuleError::InvalidParams(format!("missing field {field}")))?;
    hex::decode(value).map_err(|_| ModuleError::InvalidParams(format!("field {field} is not hex")))
}

/// Extract an unsigned integer field from reducer parameters.
pub(crate) fn param_u64(params: &ReducerValue, field: &str) -> Result<u64, ModuleError> {
    params
        .get(field)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ModuleError::InvalidParams(format!("missing field {field}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
