//! # Protocol Configuration & Constants
//!
//! Every magic number in Meridian lives here. Consensus constants are fixed
//! at genesis; changing them on a running network is a hard fork.
//!
//! Constants are grouped by the subsystem that owns them. Modules never
//! define their own copies of these values.

// ---------------------------------------------------------------------------
// Network Identifiers
// ---------------------------------------------------------------------------

/// Length of the network identifier in bytes. Mixed into every block and
/// transaction signature so that signatures cannot be replayed across
/// networks (mainnet vs testnet vs local devnets).
pub const NETWORK_IDENTIFIER_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Block Parameters
// ---------------------------------------------------------------------------

/// Target seconds between blocks. One forging slot per interval.
pub const BLOCK_TIME: u32 = 10;

/// Maximum total encoded payload size per block, in bytes.
pub const MAX_PAYLOAD_LENGTH: usize = 15 * 1024;

/// Maximum number of transactions in a single block payload.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 128;

/// Current block header version.
pub const BLOCK_VERSION: u32 = 2;

/// Number of validator slots in the active set. Also the round length:
/// each active validator forges exactly once per round.
pub const ACTIVE_VALIDATORS: usize = 31;

// ---------------------------------------------------------------------------
// Account Parameters
// ---------------------------------------------------------------------------

/// Address length in bytes. Derived as the first 20 bytes of the BLAKE3
/// hash of the account's Ed25519 public key.
pub const ADDRESS_LENGTH: usize = 20;

/// Minimum balance that must remain on a sender account after a transfer.
/// Keeps dust accounts from bloating the state space.
pub const MIN_REMAINING_BALANCE: u64 = 5_000_000;

/// Maximum length of a registered delegate username.
pub const MAX_USERNAME_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// BFT Parameters
// ---------------------------------------------------------------------------

/// Number of recent block headers the finality tracker keeps for its
/// prevote/precommit accounting. Three rounds is enough for any height
/// still eligible for finalization.
pub const BFT_PROCESSING_WINDOW: usize = 3 * ACTIVE_VALIDATORS;

// ---------------------------------------------------------------------------
// Transaction Pool & Broadcaster
// ---------------------------------------------------------------------------

/// Maximum number of pending transactions held in the pool.
pub const MAX_POOL_TRANSACTIONS: usize = 4096;

/// Number of recently-included transaction ids remembered by the pool.
/// `merged()` unions these with the pending set.
pub const RECENTLY_INCLUDED_CAP: usize = 1024;

/// Milliseconds between broadcaster release windows.
pub const BROADCAST_INTERVAL_MS: u64 = 5_000;

/// Maximum transaction ids announced per release window.
pub const BROADCAST_RELEASE_LIMIT: usize = 25;

// ---------------------------------------------------------------------------
// Transport Limits
// ---------------------------------------------------------------------------

/// Maximum transaction ids a peer may request in one `getTransactions` call.
pub const MAX_GET_TRANSACTIONS: usize = 25;

/// Maximum block ids accepted in a `getHighestCommonBlock` request.
pub const MAX_COMMON_BLOCK_IDS: usize = 100;

/// Sliding rate-limit window applied per `(peer, rpc)` pair, in seconds.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 10;

/// Calls allowed per `(peer, rpc)` pair within one rate-limit window.
pub const RATE_LIMIT_MAX_CALLS: usize = 3;

/// Peer penalty for malformed or oversized requests and invalid payloads.
pub const PENALTY_INVALID: u32 = 100;

/// Peer penalty for exceeding the per-RPC rate limit.
pub const PENALTY_RATE_LIMIT: u32 = 10;

// ---------------------------------------------------------------------------
// Job Queue
// ---------------------------------------------------------------------------

/// Capacity of the processor's job mailbox. Submissions beyond this apply
/// backpressure to callers rather than queueing unboundedly.
pub const JOB_QUEUE_CAPACITY: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_length_matches_active_set() {
        // One forging slot per active validator per round.
        assert_eq!(BFT_PROCESSING_WINDOW % ACTIVE_VALIDATORS, 0);
    }

    #[test]
    fn broadcaster_limits_are_sane() {
        assert!(BROADCAST_RELEASE_LIMIT <= MAX_GET_TRANSACTIONS);
        assert!(MAX_POOL_TRANSACTIONS > BROADCAST_RELEASE_LIMIT);
    }
}
