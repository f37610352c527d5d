//! # DPoS Module
//!
//! Module id 5. Owns delegate registration, voting, forging productivity
//! accounting, and the round-boundary rotation of the active validator
//! set.
//!
//! ## Chain state
//!
//! - `dpos:name:<username>` -> delegate address. Username uniqueness.
//! - `dpos:delegates` -> registry of `(address, public_key)` for every
//!   registered delegate; the vote-weight snapshot at a round boundary is
//!   computed from the accounts it points at.
//!
//! ## Rounds
//!
//! A round is [`ROUND_LENGTH`] blocks; each active validator owns one
//! slot per round. When the last block of a round is applied, the module
//! recomputes the active set from vote weights (banned delegates
//! excluded), installs it for the next round, and queues an
//! `app:round:change` event.

use std::sync::Arc;

use serde_json::json;

use crate::account::{SentVote, UnlockingEntry};
use crate::chain::{Validator, ValidatorList};
use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::config::{ACTIVE_VALIDATORS, MAX_USERNAME_LENGTH};
use crate::modules::{
    AfterBlockContext, ChainModule, GenesisContext, ModuleError, TransactionAsset,
    TransactionContext,
};
use crate::storage::StateStore;

/// Module id on the wire.
pub const DPOS_MODULE_ID: u32 = 5;

/// Register-delegate asset id.
pub const REGISTER_ASSET_ID: u32 = 0;

/// Vote asset id.
pub const VOTE_ASSET_ID: u32 = 1;

/// Blocks per round. One slot per active validator.
pub const ROUND_LENGTH: u32 = ACTIVE_VALIDATORS as u32;

/// Maximum votes in one vote transaction.
const MAX_VOTES_PER_TRANSACTION: usize = 20;

/// Consecutive missed slots before a delegate is banned.
const MAX_CONSECUTIVE_MISSED: u32 = 50;

/// Chain-state key for the delegate registry.
const DELEGATES_STATE_KEY: &[u8] = b"dpos:delegates";

fn username_state_key(username: &str) -> Vec<u8> {
    let mut key = b"dpos:name:".to_vec();
    key.extend_from_slice(username.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// Delegate registry
// ---------------------------------------------------------------------------

/// One registered delegate: address plus the public key header signatures
/// are verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateEntry {
    pub address: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Encode for DelegateEntry {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.address);
        writer.write_bytes(2, &self.public_key);
    }
}

impl Decode for DelegateEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: reader.read_bytes(1)?,
            public_key: reader.read_bytes(2)?,
        })
    }
}

/// All registered delegates, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegateRegistry {
    pub entries: Vec<DelegateEntry>,
}

impl Encode for DelegateRegistry {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_objects(1, &self.entries);
    }
}

impl Decode for DelegateRegistry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entries: reader.read_repeated_objects(1)?,
        })
    }
}

fn load_registry(state: &mut StateStore) -> Result<DelegateRegistry, ModuleError> {
    match state.get_chain_state(DELEGATES_STATE_KEY)? {
        Some(bytes) => Ok(DelegateRegistry::decode_from_bytes(&bytes)?),
        None => Ok(DelegateRegistry::default()),
    }
}

fn store_registry(state: &mut StateStore, registry: &DelegateRegistry) -> Result<(), ModuleError> {
    state.set_chain_state(DELEGATES_STATE_KEY, registry.encode_to_bytes())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Register-delegate asset
// ---------------------------------------------------------------------------

/// Register asset schema: `{ username(1) string }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterAssetData {
    pub username: String,
}

impl Encode for RegisterAssetData {
    fn encode(&self, writer: &mut Writer) {
        writer.write_string(1, &self.username);
    }
}

impl Decode for RegisterAssetData {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            username: reader.read_string(1)?,
        })
    }
}

/// Turns an account into a delegate under a unique username.
pub struct RegisterDelegateAsset;

impl TransactionAsset for RegisterDelegateAsset {
    fn id(&self) -> u32 {
        REGISTER_ASSET_ID
    }

    fn name(&self) -> &'static str {
        "registerDelegate"
    }

    fn validate(&self, asset_bytes: &[u8]) -> Result<(), ModuleError> {
        let asset = RegisterAssetData::decode_from_bytes(asset_bytes)?;
        if asset.username.is_empty() || asset.username.len() > MAX_USERNAME_LENGTH {
            return Err(ModuleError::InvalidAsset(format!(
                "username must be 1..={MAX_USERNAME_LENGTH} characters"
            )));
        }
        if !asset
            .username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_')
        {
            return Err(ModuleError::InvalidAsset(
                "username may contain only a-z, 0-9, '.' and '_'".into(),
            ));
        }
        Ok(())
    }

    fn apply(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ModuleError> {
        let asset = RegisterAssetData::decode_from_bytes(&ctx.transaction.asset)?;

        let mut sender = ctx.state.get_account_or_default(&ctx.sender_address)?;
        if sender.is_delegate() {
            return Err(ModuleError::Apply("account is already a delegate".into()));
        }

        let name_key = username_state_key(&asset.username);
        if ctx.state.get_chain_state(&name_key)?.is_some() {
            return Err(ModuleError::Apply(format!(
                "username {} is taken",
                asset.username
            )));
        }

        sender.asset.username = asset.username.clone();
        ctx.state.set_account(&sender)?;
        ctx.state
            .set_chain_state(&name_key, ctx.sender_address.clone())?;

        let mut registry = load_registry(ctx.state)?;
        registry.entries.push(DelegateEntry {
            address: ctx.sender_address.clone(),
            public_key: ctx.transaction.sender_public_key.clone(),
        });
        store_registry(ctx.state, &registry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vote asset
// ---------------------------------------------------------------------------

/// A single vote: positive amounts lock tokens behind a delegate,
/// negative amounts release them into the unlock queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteData {
    pub delegate_address: Vec<u8>,
    pub amount: i64,
}

impl Encode for VoteData {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.delegate_address);
        writer.write_i64(2, self.amount);
    }
}

impl Decode for VoteData {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delegate_address: reader.read_bytes(1)?,
            amount: reader.read_i64(2)?,
        })
    }
}

/// Vote asset schema: `{ votes(1) object[] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteAssetData {
    pub votes: Vec<VoteData>,
}

impl Encode for VoteAssetData {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_objects(1, &self.votes);
    }
}

impl Decode for VoteAssetData {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            votes: reader.read_repeated_objects(1)?,
        })
    }
}

/// Adjusts vote weights and the voter's locked stake.
pub struct VoteAsset;

impl TransactionAsset for VoteAsset {
    fn id(&self) -> u32 {
        VOTE_ASSET_ID
    }

    fn name(&self) -> &'static str {
        "vote"
    }

    fn validate(&self, asset_bytes: &[u8]) -> Result<(), ModuleError> {
        let asset = VoteAssetData::decode_from_bytes(asset_bytes)?;
        if asset.votes.is_empty() || asset.votes.len() > MAX_VOTES_PER_TRANSACTION {
            return Err(ModuleError::InvalidAsset(format!(
                "vote count must be 1..={MAX_VOTES_PER_TRANSACTION}"
            )));
        }
        for vote in &asset.votes {
            if vote.amount == 0 {
                return Err(ModuleError::InvalidAsset("vote amount must not be zero".into()));
            }
            if vote.delegate_address.len() != crate::config::ADDRESS_LENGTH {
                return Err(ModuleError::InvalidAsset(
                    "delegate address must be 20 bytes".into(),
                ));
            }
        }
        let mut addresses: Vec<&[u8]> = asset
            .votes
            .iter()
            .map(|v| v.delegate_address.as_slice())
            .collect();
        addresses.sort();
        addresses.dedup();
        if addresses.len() != asset.votes.len() {
            return Err(ModuleError::InvalidAsset(
                "duplicate delegate in vote list".into(),
            ));
        }
        Ok(())
    }

    fn apply(&self, ctx: &mut TransactionContext<'_>) -> Result<(), ModuleError> {
        let asset = VoteAssetData::decode_from_bytes(&ctx.transaction.asset)?;

        for vote in &asset.votes {
            // Accounts are re-fetched per vote; self-votes must observe
            // their own earlier mutations through the overlay.
            let delegate = ctx.state.get_account_or_default(&vote.delegate_address)?;
            if !delegate.is_delegate() {
                return Err(ModuleError::Apply("vote target is not a delegate".into()));
            }

            if vote.amount > 0 {
                let amount = vote.amount as u64;
                let mut sender = ctx.state.get_account_or_default(&ctx.sender_address)?;
                sender.balance = sender.balance.checked_sub(amount).ok_or(
                    ModuleError::InsufficientBalance {
                        have: sender.balance,
                        need: amount,
                    },
                )?;
                match sender
                    .asset
                    .sent_votes
                    .iter_mut()
                    .find(|v| v.delegate_address == vote.delegate_address)
                {
                    Some(sent) => sent.amount += vote.amount,
                    None => sender.asset.sent_votes.push(SentVote {
                        delegate_address: vote.delegate_address.clone(),
                        amount: vote.amount,
                    }),
                }
                ctx.state.set_account(&sender)?;

                let mut delegate = ctx.state.get_account_or_default(&vote.delegate_address)?;
                delegate.asset.total_votes_received =
                    delegate.asset.total_votes_received.saturating_add(amount);
                ctx.state.set_account(&delegate)?;
            } else {
                let amount = vote.amount.unsigned_abs();
                let mut sender = ctx.state.get_account_or_default(&ctx.sender_address)?;
                let position = sender
                    .asset
                    .sent_votes
                    .iter()
                    .position(|v| v.delegate_address == vote.delegate_address)
                    .ok_or_else(|| ModuleError::Apply("no vote to withdraw".into()))?;
                let sent = &mut sender.asset.sent_votes[position];
                if sent.amount < amount as i64 {
                    return Err(ModuleError::Apply("unvote exceeds voted amount".into()));
                }
                sent.amount -= amount as i64;
                if sent.amount == 0 {
                    sender.asset.sent_votes.remove(position);
                }
                sender.asset.unlocking.push(UnlockingEntry {
                    delegate_address: vote.delegate_address.clone(),
                    amount,
                    unvote_height: ctx.block_height,
                });
                ctx.state.set_account(&sender)?;

                let mut delegate = ctx.state.get_account_or_default(&vote.delegate_address)?;
                delegate.asset.total_votes_received =
                    delegate.asset.total_votes_received.saturating_sub(amount);
                ctx.state.set_account(&delegate)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// The DPoS module.
pub struct DposModule;

impl ChainModule for DposModule {
    fn id(&self) -> u32 {
        DPOS_MODULE_ID
    }

    fn name(&self) -> &'static str {
        "dpos"
    }

    fn transaction_assets(&self) -> Vec<Arc<dyn TransactionAsset>> {
        vec![Arc::new(RegisterDelegateAsset), Arc::new(VoteAsset)]
    }

    fn after_genesis_block_apply(&self, ctx: &mut GenesisContext<'_>) -> Result<(), ModuleError> {
        let mut registry = DelegateRegistry::default();
        let mut validators = ValidatorList::default();

        for delegate in &ctx.asset.init_delegates {
            let mut account = ctx.state.get_account_or_default(&delegate.address)?;
            account.asset.username = delegate.username.clone();
            ctx.state.set_account(&account)?;
            ctx.state
                .set_chain_state(&username_state_key(&delegate.username), delegate.address.clone())?;

            registry.entries.push(DelegateEntry {
                address: delegate.address.clone(),
                public_key: delegate.public_key.clone(),
            });
            if validators.len() < ACTIVE_VALIDATORS {
                validators.validators.push(Validator {
                    address: delegate.address.clone(),
                    public_key: delegate.public_key.clone(),
                });
            }
        }

        store_registry(ctx.state, &registry)?;
        ctx.state.set_chain_state(
            crate::chain::VALIDATORS_STATE_KEY,
            validators.encode_to_bytes(),
        )?;
        Ok(())
    }

    fn after_block_apply(&self, ctx: &mut AfterBlockContext<'_>) -> Result<(), ModuleError> {
        let header = &ctx.block.header;
        let validators = ctx.validators()?;

        // Forging productivity: the generator's streak resets, skipped
        // slots between the parent and this block count against their
        // owners.
        let mut generator = ctx.state.get_account_or_default(&header.generator_address)?;
        generator.asset.last_forged_height = header.height;
        generator.asset.consecutive_missed_blocks = 0;
        ctx.state.set_account(&generator)?;

        let block_slot = ctx.slots.slot_number(header.timestamp);
        let previous_slot = ctx.slots.slot_number(ctx.previous_timestamp);
        for slot in previous_slot.saturating_add(1)..block_slot {
            let Some(owner) = validators.for_slot(slot) else {
                continue;
            };
            if owner.address == header.generator_address {
                continue;
            }
            let mut missed = ctx.state.get_account_or_default(&owner.address)?;
            missed.asset.consecutive_missed_blocks += 1;
            if missed.asset.consecutive_missed_blocks >= MAX_CONSECUTIVE_MISSED {
                missed.asset.is_banned = true;
            }
            ctx.state.set_account(&missed)?;
        }

        // Round boundary: rotate the active set by vote weight.
        if header.height > 0 && header.height % ROUND_LENGTH == 0 {
            let next = self.compute_validator_set(ctx.state)?;
            ctx.set_validators(&next)?;
            ctx.emit(
                "round:change",
                json!({
                    "number": header.height / ROUND_LENGTH + 1,
                    "height": header.height,
                    "validators": next
                        .validators
                        .iter()
                        .map(|v| hex::encode(&v.address))
                        .collect::<Vec<_>>(),
                }),
            );
        }
        Ok(())
    }
}

impl DposModule {
    /// Snapshot the delegate registry into the next active set: banned
    /// delegates out, the rest sorted by vote weight (address as the
    /// deterministic tiebreaker), truncated to [`ACTIVE_VALIDATORS`].
    fn compute_validator_set(&self, state: &mut StateStore) -> Result<ValidatorList, ModuleError> {
        let registry = load_registry(state)?;
        let mut weighted = Vec::with_capacity(registry.entries.len());
        for entry in registry.entries {
            let account = state.get_account_or_default(&entry.address)?;
            if account.asset.is_banned {
                continue;
            }
            weighted.push((account.asset.total_votes_received, entry));
        }
        weighted.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.address.cmp(&b.1.address)));
        weighted.truncate(ACTIVE_VALIDATORS);

        Ok(ValidatorList {
            validators: weighted
                .into_iter()
                .map(|(_, entry)| Validator {
                    address: entry.address,
                    public_key: entry.public_key,
                })
                .collect(),
        })
    }
}

/// Address a registered username resolves to, if any. Used by RPC
/// queries.
pub fn resolve_username(
    state: &mut StateStore,
    username: &str,
) -> Result<Option<Vec<u8>>, ModuleError> {
    Ok(state.get_chain_state(&username_state_key(username))?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::chain::block::{compute_transaction_root, Block, BlockHeader};
    use crate::chain::Slots;
    use crate::crypto::address_from_public_key;
    use crate::modules::ModuleRegistry;
    use crate::storage::KvStore;
    use crate::transaction::Transaction;

    fn state() -> StateStore {
        StateStore::new(Arc::new(KvStore::open_temporary().unwrap()))
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(DposModule)).unwrap();
        registry
    }

    fn register_tx(username: &str, sender_public_key: Vec<u8>) -> Transaction {
        Transaction {
            module_id: DPOS_MODULE_ID,
            asset_id: REGISTER_ASSET_ID,
            nonce: 0,
            fee: 0,
            sender_public_key,
            asset: RegisterAssetData {
                username: username.into(),
            }
            .encode_to_bytes(),
            signatures: vec![vec![0; 64]],
        }
    }

    fn make_delegate(state: &mut StateStore, address: &[u8], username: &str, votes: u64) {
        let mut account = Account::with_address(address.to_vec());
        account.asset.username = username.to_string();
        account.asset.total_votes_received = votes;
        state.set_account(&account).unwrap();
    }

    #[test]
    fn register_sets_username_and_uniqueness_key() {
        let registry = registry();
        let mut state = state();
        let sender = address_from_public_key(&[1u8; 32]);
        state
            .set_account(&Account::with_address(sender.clone()))
            .unwrap();

        let tx = register_tx("alice_01", vec![1u8; 32]);
        let mut ctx = TransactionContext {
            transaction: &tx,
            sender_address: sender.clone(),
            block_height: 5,
            state: &mut state,
            reducers: registry.reducer_handler(),
        };
        RegisterDelegateAsset.apply(&mut ctx).unwrap();

        let account = state.get_account(&sender).unwrap().unwrap();
        assert_eq!(account.asset.username, "alice_01");
        assert_eq!(
            resolve_username(&mut state, "alice_01").unwrap(),
            Some(sender.clone())
        );

        // Second registration under the same name fails.
        let other = address_from_public_key(&[2u8; 32]);
        let tx2 = register_tx("alice_01", vec![2u8; 32]);
        let mut ctx = TransactionContext {
            transaction: &tx2,
            sender_address: other,
            block_height: 6,
            state: &mut state,
            reducers: registry.reducer_handler(),
        };
        assert!(RegisterDelegateAsset.apply(&mut ctx).is_err());
    }

    #[test]
    fn register_validate_rejects_bad_usernames() {
        for bad in ["", "UPPER", "with space", "waaaaaaaaaaaaaaaaytoolong"] {
            let data = RegisterAssetData {
                username: bad.into(),
            };
            assert!(
                RegisterDelegateAsset.validate(&data.encode_to_bytes()).is_err(),
                "expected {bad:?} to be rejected"
            );
        }
        let ok = RegisterAssetData {
            username: "good.name_7".into(),
        };
        assert!(RegisterDelegateAsset.validate(&ok.encode_to_bytes()).is_ok());
    }

    #[test]
    fn upvote_locks_stake_and_raises_weight() {
        let registry = registry();
        let mut state = state();
        let voter = vec![1u8; 20];
        let delegate = vec![2u8; 20];

        let mut account = Account::with_address(voter.clone());
        account.balance = 1_000;
        state.set_account(&account).unwrap();
        make_delegate(&mut state, &delegate, "del", 0);

        let asset = VoteAssetData {
            votes: vec![VoteData {
                delegate_address: delegate.clone(),
                amount: 400,
            }],
        };
        let tx = Transaction {
            module_id: DPOS_MODULE_ID,
            asset_id: VOTE_ASSET_ID,
            nonce: 0,
            fee: 0,
            sender_public_key: vec![1; 32],
            asset: asset.encode_to_bytes(),
            signatures: vec![vec![0; 64]],
        };
        let mut ctx = TransactionContext {
            transaction: &tx,
            sender_address: voter.clone(),
            block_height: 10,
            state: &mut state,
            reducers: registry.reducer_handler(),
        };
        VoteAsset.apply(&mut ctx).unwrap();

        let voter_account = state.get_account(&voter).unwrap().unwrap();
        assert_eq!(voter_account.balance, 600);
        assert_eq!(voter_account.asset.sent_votes.len(), 1);
        assert_eq!(voter_account.asset.sent_votes[0].amount, 400);

        let delegate_account = state.get_account(&delegate).unwrap().unwrap();
        assert_eq!(delegate_account.asset.total_votes_received, 400);
    }

    #[test]
    fn downvote_queues_unlock_and_lowers_weight() {
        let registry = registry();
        let mut state = state();
        let voter = vec![1u8; 20];
        let delegate = vec![2u8; 20];

        let mut account = Account::with_address(voter.clone());
        account.asset.sent_votes.push(SentVote {
            delegate_address: delegate.clone(),
            amount: 400,
        });
        state.set_account(&account).unwrap();
        make_delegate(&mut state, &delegate, "del", 400);

        let asset = VoteAssetData {
            votes: vec![VoteData {
                delegate_address: delegate.clone(),
                amount: -150,
            }],
        };
        let tx = Transaction {
            module_id: DPOS_MODULE_ID,
            asset_id: VOTE_ASSET_ID,
            nonce: 0,
            fee: 0,
            sender_public_key: vec![1; 32],
            asset: asset.encode_to_bytes(),
            signatures: vec![vec![0; 64]],
        };
        let mut ctx = TransactionContext {
            transaction: &tx,
            sender_address: voter.clone(),
            block_height: 42,
            state: &mut state,
            reducers: registry.reducer_handler(),
        };
        VoteAsset.apply(&mut ctx).unwrap();

        let voter_account = state.get_account(&voter).unwrap().unwrap();
        assert_eq!(voter_account.asset.sent_votes[0].amount, 250);
        assert_eq!(
            voter_account.asset.unlocking,
            vec![UnlockingEntry {
                delegate_address: delegate.clone(),
                amount: 150,
                unvote_height: 42,
            }]
        );

        let delegate_account = state.get_account(&delegate).unwrap().unwrap();
        assert_eq!(delegate_account.asset.total_votes_received, 250);
    }

    #[test]
    fn vote_for_non_delegate_fails() {
        let registry = registry();
        let mut state = state();
        let voter = vec![1u8; 20];
        let mut account = Account::with_address(voter.clone());
        account.balance = 1_000;
        state.set_account(&account).unwrap();

        let asset = VoteAssetData {
            votes: vec![VoteData {
                delegate_address: vec![9u8; 20],
                amount: 100,
            }],
        };
        let tx = Transaction {
            module_id: DPOS_MODULE_ID,
            asset_id: VOTE_ASSET_ID,
            nonce: 0,
            fee: 0,
            sender_public_key: vec![1; 32],
            asset: asset.encode_to_bytes(),
            signatures: vec![vec![0; 64]],
        };
        let mut ctx = TransactionContext {
            transaction: &tx,
            sender_address: voter,
            block_height: 1,
            state: &mut state,
            reducers: registry.reducer_handler(),
        };
        assert!(VoteAsset.apply(&mut ctx).is_err());
    }

    #[test]
    fn vote_validate_rejects_duplicates_and_zero() {
        let duplicate = VoteAssetData {
            votes: vec![
                VoteData {
                    delegate_address: vec![2u8; 20],
                    amount: 10,
                },
                VoteData {
                    delegate_address: vec![2u8; 20],
                    amount: -10,
                },
            ],
        };
        assert!(VoteAsset.validate(&duplicate.encode_to_bytes()).is_err());

        let zero = VoteAssetData {
            votes: vec![VoteData {
                delegate_address: vec![2u8; 20],
                amount: 0,
            }],
        };
        assert!(VoteAsset.validate(&zero.encode_to_bytes()).is_err());
    }

    fn block_at(height: u32, timestamp: u32, generator: Vec<u8>) -> Block {
        Block {
            header: BlockHeader {
                version: 2,
                timestamp,
                height,
                previous_block_id: vec![0; 32],
                transaction_root: compute_transaction_root(&[]),
                generator_address: generator,
                state_root: vec![0; 32],
                assets: vec![],
                signature: vec![],
            },
            payload: vec![],
        }
    }

    fn after_ctx<'a>(
        block: &'a Block,
        previous_timestamp: u32,
        state: &'a mut StateStore,
        registry: &'a ModuleRegistry,
    ) -> AfterBlockContext<'a> {
        AfterBlockContext {
            block,
            previous_timestamp,
            slots: Slots::new(0),
            state,
            reducers: registry.reducer_handler(),
            events: Vec::new(),
        }
    }

    #[test]
    fn after_block_updates_generator_and_missed_slots() {
        let registry = registry();
        let mut state = state();
        let generator = vec![1u8; 20];
        let skipped = vec![2u8; 20];
        make_delegate(&mut state, &generator, "gen", 0);
        make_delegate(&mut state, &skipped, "skip", 0);

        // Active set of two, alternating slots.
        let validators = ValidatorList {
            validators: vec![
                Validator {
                    address: skipped.clone(),
                    public_key: vec![2; 32],
                },
                Validator {
                    address: generator.clone(),
                    public_key: vec![1; 32],
                },
            ],
        };
        state
            .set_chain_state(
                crate::chain::VALIDATORS_STATE_KEY,
                validators.encode_to_bytes(),
            )
            .unwrap();

        // Parent at slot 0, block at slot 3: slots 1 and 2 were skipped.
        // Slot 1 belongs to the generator itself, slot 2 to `skipped`.
        let block = block_at(7, 30, generator.clone());
        let mut ctx = after_ctx(&block, 0, &mut state, &registry);
        DposModule.after_block_apply(&mut ctx).unwrap();

        let generator_account = state.get_account(&generator).unwrap().unwrap();
        assert_eq!(generator_account.asset.last_forged_height, 7);
        assert_eq!(generator_account.asset.consecutive_missed_blocks, 0);

        let skipped_account = state.get_account(&skipped).unwrap().unwrap();
        assert_eq!(skipped_account.asset.consecutive_missed_blocks, 1);
    }

    #[test]
    fn round_boundary_rotates_validators_and_emits_event() {
        let registry = registry();
        let mut state = state();

        // Three registered delegates with distinct weights.
        let mut delegate_registry = DelegateRegistry::default();
        for (i, votes) in [(1u8, 300u64), (2, 100), (3, 200)] {
            let address = vec![i; 20];
            make_delegate(&mut state, &address, &format!("d{i}"), votes);
            delegate_registry.entries.push(DelegateEntry {
                address,
                public_key: vec![i; 32],
            });
        }
        store_registry(&mut state, &delegate_registry).unwrap();
        state
            .set_chain_state(
                crate::chain::VALIDATORS_STATE_KEY,
                ValidatorList::default().encode_to_bytes(),
            )
            .unwrap();

        let block = block_at(ROUND_LENGTH, ROUND_LENGTH * 10, vec![1u8; 20]);
        let mut ctx = after_ctx(&block, ROUND_LENGTH * 10 - 10, &mut state, &registry);
        DposModule.after_block_apply(&mut ctx).unwrap();

        assert_eq!(ctx.events.len(), 1);
        assert_eq!(ctx.events[0].0, "round:change");

        let validators = ValidatorList::decode_from_bytes(
            &state
                .get_chain_state(crate::chain::VALIDATORS_STATE_KEY)
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        // Sorted by weight: d1 (300), d3 (200), d2 (100).
        let order: Vec<Vec<u8>> = validators
            .validators
            .iter()
            .map(|v| v.address.clone())
            .collect();
        assert_eq!(order, vec![vec![1u8; 20], vec![3u8; 20], vec![2u8; 20]]);
    }

    #[test]
    fn banned_delegates_are_excluded_from_rotation() {
        let registry = registry();
        let mut state = state();

        let mut delegate_registry = DelegateRegistry::default();
        for i in [1u8, 2] {
            let address = vec![i; 20];
            make_delegate(&mut state, &address, &format!("d{i}"), 100);
            delegate_registry.entries.push(DelegateEntry {
                address,
                public_key: vec![i; 32],
            });
        }
        store_registry(&mut state, &delegate_registry).unwrap();

        let mut banned = state.get_account(&[2u8; 20]).unwrap().unwrap();
        banned.asset.is_banned = true;
        state.set_account(&banned).unwrap();

        let next = DposModule.compute_validator_set(&mut state).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next.validators[0].address, vec![1u8; 20]);
    }
}
