//! # Account Model
//!
//! Accounts are keyed by address; address uniqueness is the sole account
//! invariant. Balance and nonce live at the top level, multisignature
//! configuration under `keys`, and the delegate sub-object under `asset`.
//!
//! Canonical encoding (field numbers in parentheses):
//!
//! ```text
//! Account    { address(1) bytes, balance(2) u64, nonce(3) u64,
//!              keys(4) object, asset(5) object }
//! Keys       { number_of_signatures(1) u32, mandatory_keys(2) bytes[],
//!              optional_keys(3) bytes[] }
//! Delegate   { username(1) string, pom_heights(2) u32[],
//!              consecutive_missed_blocks(3) u32,
//!              last_forged_height(4) u32, is_banned(5) bool,
//!              total_votes_received(6) u64, sent_votes(7) object[],
//!              unlocking(8) object[] }
//! SentVote   { delegate_address(1) bytes, amount(2) sint64 }
//! Unlocking  { delegate_address(1) bytes, amount(2) u64,
//!              unvote_height(3) u32 }
//! ```

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Multisignature configuration. A default of zero signatures means the
/// account is a plain single-signature account controlled by its sender
/// public key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountKeys {
    pub number_of_signatures: u32,
    pub mandatory_keys: Vec<Vec<u8>>,
    pub optional_keys: Vec<Vec<u8>>,
}

impl Encode for AccountKeys {
    fn encode(&self, writer: &mut Writer) {
        writer.write_u32(1, self.number_of_signatures);
        writer.write_repeated_bytes(2, &self.mandatory_keys);
        writer.write_repeated_bytes(3, &self.optional_keys);
    }
}

impl Decode for AccountKeys {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            number_of_signatures: reader.read_u32(1)?,
            mandatory_keys: reader.read_repeated_bytes(2)?,
            optional_keys: reader.read_repeated_bytes(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Delegate asset
// ---------------------------------------------------------------------------

/// A vote cast by this account for a delegate. Amounts are signed so a
/// downvote (unvote) is representable in the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentVote {
    pub delegate_address: Vec<u8>,
    pub amount: i64,
}

impl Encode for SentVote {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.delegate_address);
        writer.write_i64(2, self.amount);
    }
}

impl Decode for SentVote {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delegate_address: reader.read_bytes(1)?,
            amount: reader.read_i64(2)?,
        })
    }
}

/// Tokens waiting out the unlock period after an unvote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockingEntry {
    pub delegate_address: Vec<u8>,
    pub amount: u64,
    pub unvote_height: u32,
}

impl Encode for UnlockingEntry {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.delegate_address);
        writer.write_u64(2, self.amount);
        writer.write_u32(3, self.unvote_height);
    }
}

impl Decode for UnlockingEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delegate_address: reader.read_bytes(1)?,
            amount: reader.read_u64(2)?,
            unvote_height: reader.read_u32(3)?,
        })
    }
}

/// The delegate sub-object. Empty `username` means the account has not
/// registered as a delegate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegateAsset {
    pub username: String,
    pub pom_heights: Vec<u32>,
    pub consecutive_missed_blocks: u32,
    pub last_forged_height: u32,
    pub is_banned: bool,
    pub total_votes_received: u64,
    pub sent_votes: Vec<SentVote>,
    pub unlocking: Vec<UnlockingEntry>,
}

impl Encode for DelegateAsset {
    fn encode(&self, writer: &mut Writer) {
        writer.write_string(1, &self.username);
        writer.write_repeated_u32(2, &self.pom_heights);
        writer.write_u32(3, self.consecutive_missed_blocks);
        writer.write_u32(4, self.last_forged_height);
        writer.write_bool(5, self.is_banned);
        writer.write_u64(6, self.total_votes_received);
        writer.write_repeated_objects(7, &self.sent_votes);
        writer.write_repeated_objects(8, &self.unlocking);
    }
}

impl Decode for DelegateAsset {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            username: reader.read_string(1)?,
            pom_heights: reader.read_repeated_u32(2)?,
            consecutive_missed_blocks: reader.read_u32(3)?,
            last_forged_height: reader.read_u32(4)?,
            is_banned: reader.read_bool(5)?,
            total_votes_received: reader.read_u64(6)?,
            sent_votes: reader.read_repeated_objects(7)?,
            unlocking: reader.read_repeated_objects(8)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// The on-chain state of a single account. Every field is
/// consensus-critical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub address: Vec<u8>,
    pub balance: u64,
    pub nonce: u64,
    pub keys: AccountKeys,
    pub asset: DelegateAsset,
}

impl Account {
    /// A fresh default account at the given address.
    pub fn with_address(address: Vec<u8>) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// True when this account has registered a delegate username.
    pub fn is_delegate(&self) -> bool {
        !self.asset.username.is_empty()
    }
}

impl Encode for Account {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.address);
        writer.write_u64(2, self.balance);
        writer.write_u64(3, self.nonce);
        writer.write_object(4, &self.keys);
        writer.write_object(5, &self.asset);
    }
}

impl Decode for Account {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: reader.read_bytes(1)?,
            balance: reader.read_u64(2)?,
            nonce: reader.read_u64(3)?,
            keys: reader.read_object(4)?,
            asset: reader.read_object(5)?,
        })
    }
}
