//! # BFT & Fork Choice
//!
//! Two concerns, both pure over block headers:
//!
//! - [`fork_choice`] classifies an incoming header against the current
//!   tip into one of the six [`ForkStatus`] variants. The processor
//!   dispatches on the result exhaustively; there is no "unknown" arm.
//! - [`FinalityTracker`] advances the finalized height monotonically
//!   using prevote/precommit accounting over recent headers. A height is
//!   precommitted once a BFT quorum (2/3 + 1) of distinct generators has
//!   forged at or above it within the processing window. Blocks at or
//!   below the finalized height are immutable.

use std::collections::{HashSet, VecDeque};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::chain::{BlockHeader, Slots};
use crate::config::BFT_PROCESSING_WINDOW;

// ---------------------------------------------------------------------------
// Fork status
// ---------------------------------------------------------------------------

/// Relationship of an incoming block to the current chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkStatus {
    /// Same id as the tip; a duplicate delivery.
    IdenticalBlock,
    /// Extends the tip directly; the normal case.
    ValidBlock,
    /// Same height and generator as the tip, different id. Evidence of
    /// double forging; the block is not applied here.
    DoubleForging,
    /// Competing block at the tip height that wins the tie-break rule:
    /// earlier slot, or equal slot and lexicographically lower id.
    TieBreak,
    /// The peer is on a chain this node cannot reach by applying one
    /// block; the synchronizer must take over.
    DifferentChain,
    /// Stale or irrelevant; drop it.
    Discard,
}

/// Classify `incoming` against the current `tip`.
///
/// The checks are ordered from most to least specific; exactly one
/// variant is returned for every input.
pub fn fork_choice(incoming: &BlockHeader, tip: &BlockHeader, slots: &Slots) -> ForkStatus {
    let incoming_id = incoming.id();
    let tip_id = tip.id();

    if incoming_id == tip_id {
        return ForkStatus::IdenticalBlock;
    }

    if incoming.height == tip.height + 1 && incoming.previous_block_id == tip_id {
        return ForkStatus::ValidBlock;
    }

    if incoming.height == tip.height {
        if incoming.generator_address == tip.generator_address {
            return ForkStatus::DoubleForging;
        }
        let incoming_slot = slots.slot_number(incoming.timestamp);
        let tip_slot = slots.slot_number(tip.timestamp);
        let preferable =
            incoming_slot < tip_slot || (incoming_slot == tip_slot && incoming_id < tip_id);
        if preferable {
            return ForkStatus::TieBreak;
        }
    }

    if incoming.height > tip.height + 1
        || (incoming.height == tip.height + 1 && incoming.previous_block_id != tip_id)
    {
        return ForkStatus::DifferentChain;
    }

    ForkStatus::Discard
}

// ---------------------------------------------------------------------------
// Finality
// ---------------------------------------------------------------------------

/// BFT errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BftError {
    #[error("block at height {height} contradicts finality (finalized height {finalized})")]
    ContradictsFinality { height: u32, finalized: u32 },
}

/// Header facts the tracker keeps per applied block.
#[derive(Debug, Clone)]
struct HeaderInfo {
    height: u32,
    generator: Vec<u8>,
}

/// Monotone finalized-height accounting over recent block headers.
#[derive(Debug)]
pub struct FinalityTracker {
    finalized: RwLock<u32>,
    recent: Mutex<VecDeque<HeaderInfo>>,
}

impl FinalityTracker {
    /// Start from a persisted finalized height (0 for a fresh chain).
    pub fn new(finalized_height: u32) -> Self {
        Self {
            finalized: RwLock::new(finalized_height),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// The current finalized height. Never decreases.
    pub fn finalized_height(&self) -> u32 {
        *self.finalized.read()
    }

    /// Reject headers that would rewrite finalized history.
    pub fn verify_block_header(&self, header: &BlockHeader) -> Result<(), BftError> {
        let finalized = self.finalized_height();
        if header.height <= finalized && finalized > 0 {
            return Err(BftError::ContradictsFinality {
                height: header.height,
                finalized,
            });
        }
        Ok(())
    }

    /// Fold an applied header into the accounting and return the (possibly
    /// advanced) finalized height.
    ///
    /// `active_validators` sizes the quorum: `2n/3 + 1` distinct
    /// generators forging at or above a height precommit it.
    pub fn apply_block_header(&self, header: &BlockHeader, active_validators: usize) -> u32 {
        let mut recent = self.recent.lock();
        recent.push_back(HeaderInfo {
            height: header.height,
            generator: header.generator_address.clone(),
        });
        while recent.len() > BFT_PROCESSING_WINDOW {
            recent.pop_front();
        }

        let threshold = quorum(active_validators);
        let mut finalized = self.finalized.write();
        let mut candidate = header.height;
        let new_finalized = loop {
            if candidate <= *finalized {
                break *finalized;
            }
            let supporters: HashSet<&[u8]> = recent
                .iter()
                .filter(|info| info.height >= candidate)
                .map(|info| info.generator.as_slice())
                .collect();
            if supporters.len() >= threshold {
                break candidate;
            }
            candidate -= 1;
        };

        if new_finalized > *finalized {
            debug!(finalized = new_finalized, "finalized height advanced");
            *finalized = new_finalized;
        }
        *finalized
    }

    /// Forget the tracker's facts about a deleted tip block. Finality
    /// itself never rolls back.
    pub fn remove_block_header(&self, height: u32) {
        self.recent.lock().retain(|info| info.height != height);
    }
}

/// BFT quorum: two thirds plus one.
fn quorum(active_validators: usize) -> usize {
    (2 * active_validators) / 3 + 1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
