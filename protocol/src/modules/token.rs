//! # Token Module
//!
//! Module id 2. Owns balances, nonce sequencing, and fee collection:
//!
//! - `before_transaction_apply` checks the sender nonce and burns the fee.
//! - The transfer asset (id 0) moves funds, enforcing the minimum
//!   remaining balance on the sender.
//! - `after_transaction_apply` increments the sender nonce.
//! - Reducers `token:credit`, `token:debit`, and `token:getBalance` let
//!   other modules move and inspect balances without owning account
//!   encoding.
//! - The genesis hook seeds the initial account balances.

use std::sync::Arc;

use serde_json::json;

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::config::MIN_REMAINING_BALANCE;
use crate::modules::{
    param_bytes, param_u64, ChainModule, GenesisContext, ModuleError, Reducer, TransactionAsset,
    TransactionContext,
};
use crate::storage::StateStore;

/// Module id on the wire.
pub const TOKEN_MODULE_ID: u32 = 2;

/// Transfer asset id within the module.
pub const TRANSFER_ASSET_ID: u32 = 0;

/// Maximum byte length of the optional transfer memo.
const MAX_DATA_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Transfer asset
// ---------------------------------------------------------------------------

/// Transfer asset schema:
/// `{ amount(1) u64, recipient_address(2) bytes, data(3) string }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferAssetData {
    pub amount: u64,
    pub recipient_address: Vec<u8>,
    pub data: String,
}

impl Encode for TransferAssetData {
    fn encode(&self, writer: &mut Writer) {
        writer.write_u64(1, self.amount);
        writer.write_bytes(2, &self.recipient_address);
        writer.write_string(3, &self.data);
    }
}

impl Decode for TransferAssetData {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            amount: reader.read_u64(1)?,
            recipient_address: reader.read_bytes(2)?,
            data: reader.read_string(3)?,
        })
    }
}

/// The balance transfer transition.
pub struct TransferAsset;

impl TransactionAsset for TransferAsset {
    fn id(&self) -> u32 {
        TRANSFER_ASSET_ID
    }

    fn name(&self) -> &'static str {
        "transfer"
    }

    fn validate(&self, asset_bytes: &[u8]) -> Result<(), ModuleError> {
        let asset = TransferAssetData::decode_from_bytes(asset_bytes)?;
        if asset.amount == 0 {
            return Err(ModuleError::InvalidAsset("amount must be positive".into()));
        }
        if asset.recipient_address.len() != crate::config::ADDRESS_LENGTH {
            return Err(ModuleError::InvalidAsset(
                "recipient address must be 20 bytes".into(),
            ));
        }
        if asset.data.len() > MAX_DATA_LENGTH {
            return Err(ModuleError::InvalidAsset(format!(
                "data exceeds {MAX_DATA_LENGTH} bytes"
            )));
        }
        Ok(())
    }

    fn apply(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ModuleError> {
        let asset = TransferAssetData::decode_from_bytes(&ctx.transaction.asset)?;

        let mut sender = ctx.state.get_account_or_default(&ctx.sender_address)?;
        let remaining = sender
            .balance
            .checked_sub(asset.amount)
            .ok_or(ModuleError::InsufficientBalance {
                have: sender.balance,
                need: asset.amount,
            })?;
        if remaining < MIN_REMAINING_BALANCE {
            return Err(ModuleError::InsufficientBalance {
                have: sender.balance,
                need: asset.amount + MIN_REMAINING_BALANCE,
            });
        }
        sender.balance = remaining;
        ctx.state.set_account(&sender)?;

        let mut recipient = ctx.state.get_account_or_default(&asset.recipient_address)?;
        recipient.balance = recipient.balance.saturating_add(asset.amount);
        ctx.state.set_account(&recipient)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// The token module.
pub struct TokenModule;

impl ChainModule for TokenModule {
    fn id(&self) -> u32 {
        TOKEN_MODULE_ID
    }

    fn name(&self) -> &'static str {
        "token"
    }

    fn transaction_assets(&self) -> Vec<Arc<dyn TransactionAsset>> {
        vec![Arc::new(TransferAsset)]
    }

    fn reducers(&self) -> Vec<(&'static str, Reducer)> {
        vec![
            ("credit", Arc::new(credit) as Reducer),
            ("debit", Arc::new(debit) as Reducer),
            ("getBalance", Arc::new(get_balance) as Reducer),
        ]
    }

    fn after_genesis_block_apply(&self, ctx: &mut GenesisContext<'_>) -> Result<(), ModuleError> {
        for seed in &ctx.asset.accounts {
            let mut account = ctx.state.get_account_or_default(&seed.address)?;
            account.balance = seed.balance;
            ctx.state.set_account(&account)?;
        }
        Ok(())
    }

    fn before_transaction_apply(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ModuleError> {
        let tx = ctx.transaction;
        let mut sender = ctx.state.get_account_or_default(&ctx.sender_address)?;

        if sender.nonce != tx.nonce {
            return Err(ModuleError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }

        sender.balance =
            sender
                .balance
                .checked_sub(tx.fee)
                .ok_or(ModuleError::InsufficientBalance {
                    have: sender.balance,
                    need: tx.fee,
                })?;
        ctx.state.set_account(&sender)?;
        Ok(())
    }

    fn after_transaction_apply(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ModuleError> {
        let mut sender = ctx.state.get_account_or_default(&ctx.sender_address)?;
        sender.nonce += 1;
        ctx.state.set_account(&sender)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reducers
// ---------------------------------------------------------------------------

/// `token:credit { address: hex, amount: u64 }`
fn credit(params: &serde_json::Value, state: &mut StateStore) -> Result<serde_json::Value, ModuleError> {
    let address = param_bytes(params, "address")?;
    let amount = param_u64(params, "amount")?;
    let mut account = state.get_account_or_default(&address)?;
    account.balance = account.balance.saturating_add(amount);
    state.set_account(&account)?;
    Ok(json!(null))
}

/// `token:debit { address: hex, amount: u64 }`
fn debit(params: &serde_json::Value, state: &mut StateStore) -> Result<serde_json::Value, ModuleError> {
    let address = param_bytes(params, "address")?;
    let amount = param_u64(params, "amount")?;
    let mut account = state.get_account_or_default(&address)?;
    account.balance =
        account
            .balance
            .checked_sub(amount)
            .ok_or(ModuleError::InsufficientBalance {
                have: account.balance,
                need: amount,
            })?;
    state.set_account(&account)?;
    Ok(json!(null))
}

/// `token:getBalance { address: hex } -> u64`
fn get_balance(
    params: &serde_json::Value,
    state: &mut StateStore,
) -> Result<serde_json::Value, ModuleError> {
    let address = param_bytes(params, "address")?;
    let balance = state
        .get_account(&address)?
        .map(|account| account.balance)
        .unwrap_or(0);
    Ok(json!(balance))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
