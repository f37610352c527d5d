//! # Persistence Layer
//!
//! Three layers, strictly ordered:
//!
//! - [`kv`] — the ordered key/value store (sled). Owns the on-disk bytes.
//! - [`state_store`] — a per-block-application overlay that records every
//!   touched key and produces a reversible state diff at finalize time.
//! - [`block_storage`] — block headers, transactions, indexes, temp blocks,
//!   and per-height diffs, written atomically per block.
//!
//! ## Key Layout
//!
//! One keyspace, one prefix byte per domain, lexicographic order throughout.
//! Heights are big-endian `u32` so numeric and byte order agree. Prefixes
//! are spaced two apart; the odd byte between domains stays free for
//! forward-compatible additions.
//!
//! | prefix | key              | value                         |
//! |--------|------------------|-------------------------------|
//! | 0x10   | block id (32B)   | encoded header                |
//! | 0x12   | height (u32 BE)  | block id                      |
//! | 0x14   | tx id (32B)      | encoded transaction           |
//! | 0x16   | block id         | concatenated 32-byte tx ids   |
//! | 0x18   | height           | encoded full block (temp)     |
//! | 0x1a   | height           | encoded state diff            |
//! | 0x1c   | (none)           | finalized height (u32 BE)     |
//! | 0x20   | address          | encoded account               |
//! | 0x22   | module key       | opaque module bytes           |

pub mod block_storage;
pub mod kv;
pub mod state_store;

pub use block_storage::BlockStorage;
pub use kv::{KvStore, StorageError, WriteBatch};
pub use state_store::{DiffEntry, StateDiff, StateStore};

/// Physical key construction. Every on-disk key is built here and nowhere
/// else.
pub mod keys {
    /// Block id -> encoded header.
    pub const BLOCKS_ID: u8 = 0x10;
    /// Height -> block id.
    pub const BLOCKS_HEIGHT: u8 = 0x12;
    /// Transaction id -> encoded transaction.
    pub const TX_ID: u8 = 0x14;
    /// Block id -> concatenated transaction ids.
    pub const TX_BLOCK_ID: u8 = 0x16;
    /// Height -> encoded full block, preserved across a rollback.
    pub const TEMPBLOCKS_HEIGHT: u8 = 0x18;
    /// Height -> encoded state diff.
    pub const DIFF_STATE: u8 = 0x1a;
    /// Singleton: finalized height.
    pub const FINALIZED_HEIGHT: u8 = 0x1c;
    /// Address -> encoded account.
    pub const ACCOUNTS: u8 = 0x20;
    /// Module-scoped chain state.
    pub const CHAIN_STATE: u8 = 0x22;

    fn prefixed(prefix: u8, payload: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + payload.len());
        key.push(prefix);
        key.extend_from_slice(payload);
        key
    }

    /// Key for a block header by id.
    pub fn blocks_id(id: &[u8]) -> Vec<u8> {
        prefixed(BLOCKS_ID, id)
    }

    /// Key for the height -> id index.
    pub fn blocks_height(height: u32) -> Vec<u8> {
        prefixed(BLOCKS_HEIGHT, &height.to_be_bytes())
    }

    /// Key for a transaction by id.
    pub fn tx_id(id: &[u8]) -> Vec<u8> {
        prefixed(TX_ID, id)
    }

    /// Key for the block id -> tx ids index.
    pub fn tx_block_id(block_id: &[u8]) -> Vec<u8> {
        prefixed(TX_BLOCK_ID, block_id)
    }

    /// Key for a temp block by height.
    pub fn temp_block(height: u32) -> Vec<u8> {
        prefixed(TEMPBLOCKS_HEIGHT, &height.to_be_bytes())
    }

    /// Key for a state diff by height.
    pub fn diff_state(height: u32) -> Vec<u8> {
        prefixed(DIFF_STATE, &height.to_be_bytes())
    }

    /// Singleton key for the finalized height.
    pub fn finalized_height() -> Vec<u8> {
        vec![FINALIZED_HEIGHT]
    }

    /// Key for an account by address.
    pub fn account(address: &[u8]) -> Vec<u8> {
        prefixed(ACCOUNTS, address)
    }

    /// Key for module-scoped chain state.
    pub fn chain_state(key: &[u8]) -> Vec<u8> {
        prefixed(CHAIN_STATE, key)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn height_keys_sort_numerically() {
            assert!(blocks_height(1) < blocks_height(2));
            assert!(blocks_height(255) < blocks_height(256));
            assert!(diff_state(9) < diff_state(10));
        }

        #[test]
        fn domains_do_not_overlap() {
            // A maximal key in one domain stays below the next prefix.
            let mut max_blocks = blocks_id(&[0xff; 32]);
            max_blocks.push(0xff);
            assert!(max_blocks < blocks_height(0));
        }
    }
}
