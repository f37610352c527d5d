//! # Block Storage
//!
//! Persists block headers, transaction payloads, the forward and reverse
//! indexes, the temp-block buffer, and the per-height state diffs. Every
//! save and delete is a single atomic batch: a block is either fully on
//! disk with its diff and finalized height, or not at all.
//!
//! The temp-block buffer preserves rolled-back blocks so the synchronizer
//! can re-attempt them without redownloading. Diffs below the finalized
//! height can never be replayed and are purged best-effort after each
//! save; a failed purge is retried on the next one.

use std::sync::Arc;

use tracing::warn;

use crate::chain::block::{Block, BlockHeader};
use crate::codec::{Decode, Encode};
use crate::transaction::Transaction;

use super::keys;
use super::kv::{KvStore, StorageError, WriteBatch};
use super::state_store::{StateDiff, StateStore};

/// Atomic, reversible block persistence over the KV store.
#[derive(Debug, Clone)]
pub struct BlockStorage {
    kv: Arc<KvStore>,
}

impl BlockStorage {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Shared handle to the underlying store.
    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    // -- Writes ---------------------------------------------------------------

    /// Atomically persist a block, its payload, its state diff, and the
    /// new finalized height.
    ///
    /// Consumes the state store: its mutations are flushed into the same
    /// batch as the block itself. With `remove_from_temp`, the temp-block
    /// entry at this height is dropped in the same batch (used when the
    /// synchronizer re-applies a restored block).
    pub fn save_block(
        &self,
        block: &Block,
        state_store: StateStore,
        finalized_height: u32,
        remove_from_temp: bool,
    ) -> Result<(), StorageError> {
        let block_id = block.id();
        let height = block.height();
        let mut batch = WriteBatch::new();

        batch.put(keys::blocks_id(&block_id), block.header.encode_to_bytes());
        batch.put(keys::blocks_height(height), block_id.clone());

        if !block.payload.is_empty() {
            let mut id_concat = Vec::with_capacity(block.payload.len() * 32);
            for tx in &block.payload {
                let tx_id = tx.id();
                batch.put(keys::tx_id(&tx_id), tx.encode_to_bytes());
                id_concat.extend_from_slice(&tx_id);
            }
            batch.put(keys::tx_block_id(&block_id), id_concat);
        }

        if remove_from_temp {
            batch.del(keys::temp_block(height));
        }

        let diff = state_store.finalize(&mut batch);
        batch.put(keys::diff_state(height), diff.encode_to_bytes());
        batch.put(keys::finalized_height(), finalized_height.to_be_bytes().to_vec());

        self.kv.write(batch)?;

        // Best-effort: diffs below finality can never be replayed. A
        // failure here is retried on the next save.
        if finalized_height > 0 {
            if let Err(error) = self
                .kv
                .clear(&keys::diff_state(0), &keys::diff_state(finalized_height))
            {
                warn!(%error, finalized_height, "state diff purge failed; will retry");
            }
        }
        Ok(())
    }

    /// Atomically remove a block, restoring the pre-block state from its
    /// stored diff.
    ///
    /// Fails with [`StorageError::BelowFinality`] for finalized heights.
    /// With `save_temp`, the full encoded block is preserved in the
    /// temp-block buffer within the same batch. The state store's own
    /// diff is discarded; the rollback is already expressed by inverting
    /// the stored one.
    pub fn delete_block(
        &self,
        block: &Block,
        state_store: StateStore,
        save_temp: bool,
    ) -> Result<(), StorageError> {
        let height = block.height();
        let finalized = self.finalized_height()?.unwrap_or(0);
        if height <= finalized {
            return Err(StorageError::BelowFinality { height, finalized });
        }

        let block_id = block.id();
        let mut batch = WriteBatch::new();

        batch.del(keys::blocks_id(&block_id));
        batch.del(keys::blocks_height(height));
        for tx in &block.payload {
            batch.del(keys::tx_id(&tx.id()));
        }
        batch.del(keys::tx_block_id(&block_id));

        if save_temp {
            batch.put(keys::temp_block(height), block.encode_to_bytes());
        }

        let diff_bytes = self.kv.must_get(&keys::diff_state(height))?;
        let diff = StateDiff::decode_from_bytes(&diff_bytes)?;
        for key in &diff.created {
            batch.del(key.clone());
        }
        for entry in diff.updated.iter().chain(diff.deleted.iter()) {
            batch.put(entry.key.clone(), entry.value.clone());
        }

        let _ = state_store.finalize(&mut batch);
        batch.del(keys::diff_state(height));

        self.kv.write(batch)
    }

    // -- Data access ----------------------------------------------------------

    /// Header by block id.
    pub fn get_block_header_by_id(&self, id: &[u8]) -> Result<BlockHeader, StorageError> {
        let bytes = self.kv.must_get(&keys::blocks_id(id))?;
        Ok(BlockHeader::decode_from_bytes(&bytes)?)
    }

    /// Full block (header plus payload) by id.
    pub fn get_block_by_id(&self, id: &[u8]) -> Result<Block, StorageError> {
        let header = self.get_block_header_by_id(id)?;
        let payload = match self.kv.get(&keys::tx_block_id(id))? {
            Some(id_concat) => id_concat
                .chunks_exact(32)
                .map(|tx_id| self.get_transaction(tx_id))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Block { header, payload })
    }

    /// Block id at a height, through the forward index.
    pub fn get_block_id_at_height(&self, height: u32) -> Result<Vec<u8>, StorageError> {
        self.kv.must_get(&keys::blocks_height(height))
    }

    /// Full block at a height.
    pub fn get_block_by_height(&self, height: u32) -> Result<Block, StorageError> {
        let id = self.get_block_id_at_height(height)?;
        self.get_block_by_id(&id)
    }

    /// True when a block with this id is persisted.
    pub fn is_block_persisted(&self, id: &[u8]) -> Result<bool, StorageError> {
        self.kv.exists(&keys::blocks_id(id))
    }

    /// Transaction by id.
    pub fn get_transaction(&self, id: &[u8]) -> Result<Transaction, StorageError> {
        let bytes = self.kv.must_get(&keys::tx_id(id))?;
        Ok(Transaction::decode_from_bytes(&bytes)?)
    }

    /// Batch lookup: the subset of `ids` that exist, in request order.
    pub fn get_transactions(&self, ids: &[Vec<u8>]) -> Result<Vec<Transaction>, StorageError> {
        let mut found = Vec::new();
        for id in ids {
            if let Some(bytes) = self.kv.get(&keys::tx_id(id))? {
                found.push(Transaction::decode_from_bytes(&bytes)?);
            }
        }
        Ok(found)
    }

    /// True when a transaction with this id is persisted.
    pub fn is_transaction_persisted(&self, id: &[u8]) -> Result<bool, StorageError> {
        self.kv.exists(&keys::tx_id(id))
    }

    /// The first id from `ids` that is persisted on this chain, if any.
    pub fn highest_common_block_id(
        &self,
        ids: &[Vec<u8>],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        for id in ids {
            if self.is_block_persisted(id)? {
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }

    /// All buffered temp blocks, ascending by height.
    pub fn get_temp_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let gte = keys::temp_block(0);
        let lte = keys::temp_block(u32::MAX);
        let mut blocks = Vec::new();
        for (_, bytes) in self.kv.range(&gte, &lte, false, None)? {
            blocks.push(Block::decode_from_bytes(&bytes)?);
        }
        Ok(blocks)
    }

    /// Drop the whole temp-block buffer.
    pub fn clear_temp_blocks(&self) -> Result<(), StorageError> {
        let gte = keys::temp_block(0);
        let mut lt = keys::temp_block(u32::MAX);
        lt.push(0xff);
        self.kv.clear(&gte, &lt)?;
        Ok(())
    }

    /// Stored finalized height. `None` before genesis.
    pub fn finalized_height(&self) -> Result<Option<u32>, StorageError> {
        match self.kv.get(&keys::finalized_height())? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::NotFound)?;
                Ok(Some(u32::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Stored state diff at a height, if present.
    pub fn get_state_diff(&self, height: u32) -> Result<Option<StateDiff>, StorageError> {
        match self.kv.get(&keys::diff_state(height))? {
            Some(bytes) => Ok(Some(StateDiff::decode_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::block::{compute_transaction_root, BlockHeader};
    use crate::config::NETWORK_IDENTIFIER_LENGTH;
    use crate::crypto::Keypair;
    use crate::storage::keys as storage_keys;

    fn network_id() -> Vec<u8> {
        vec![0xAB; NETWORK_IDENTIFIER_LENGTH]
    }

    fn setup() -> (BlockStorage, Arc<KvStore>) {
        let kv = Arc::new(KvStore::open_temporary().unwrap());
        (BlockStorage::new(Arc::clone(&kv)), kv)
    }

    fn make_tx(keypair: &Keypair, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            module_id: 2,
            asset_id: 0,
            nonce,
            fee: 1000,
            sender_public_key: keypair.public_key().as_bytes().to_vec(),
            asset: vec![nonce as u8],
            signatures: vec![],
        };
        tx.sign(&network_id(), keypair);
        tx
    }

    fn make_block(height: u32, previous: Vec<u8>, payload: Vec<Transaction>) -> Block {
        let keypair = Keypair::generate();
        let mut header = BlockHeader {
            version: 2,
            timestamp: 1_700_000_000 + height * 10,
            height,
            previous_block_id: previous,
            transaction_root: compute_transaction_root(&payload),
            generator_address: keypair.address(),
            state_root: vec![0; 32],
            assets: vec![],
            signature: vec![],
        };
        header.sign(&network_id(), &keypair);
        Block { header, payload }
    }

    #[test]
    fn save_then_read_back_by_height_and_id() {
        let (storage, kv) = setup();
        let keypair = Keypair::generate();
        let block = make_block(1, vec![0x01; 32], vec![make_tx(&keypair, 0)]);

        let state = StateStore::new(Arc::clone(&kv));
        storage.save_block(&block, state, 0, false).unwrap();

        let by_height = storage.get_block_by_height(1).unwrap();
        assert_eq!(by_height.id(), block.id());
        assert_eq!(by_height, block);

        let by_id = storage.get_block_by_id(&block.id()).unwrap();
        assert_eq!(by_id.header, block.header);

        let tx = &block.payload[0];
        assert_eq!(storage.get_transaction(&tx.id()).unwrap(), *tx);
        assert!(storage.is_transaction_persisted(&tx.id()).unwrap());
    }

    #[test]
    fn save_records_diff_and_finalized_height() {
        let (storage, kv) = setup();
        let block = make_block(1, vec![0x01; 32], vec![]);

        let mut state = StateStore::new(Arc::clone(&kv));
        state.set(b"k", b"v".to_vec()).unwrap();
        storage.save_block(&block, state, 1, false).unwrap();

        assert_eq!(storage.finalized_height().unwrap(), Some(1));
        let diff = storage.get_state_diff(1).unwrap().unwrap();
        assert_eq!(diff.created, vec![b"k".to_vec()]);
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn delete_restores_pre_state_and_removes_diff() {
        let (storage, kv) = setup();
        kv.put(b"acct", b"100").unwrap();

        let block = make_block(5, vec![0x01; 32], vec![]);
        let mut state = StateStore::new(Arc::clone(&kv));
        state.set(b"acct", b"150".to_vec()).unwrap();
        state.set(b"fresh", b"x".to_vec()).unwrap();
        storage.save_block(&block, state, 0, false).unwrap();
        assert_eq!(kv.get(b"acct").unwrap(), Some(b"150".to_vec()));

        let undo_state = StateStore::new(Arc::clone(&kv));
        storage.delete_block(&block, undo_state, false).unwrap();

        assert_eq!(kv.get(b"acct").unwrap(), Some(b"100".to_vec()));
        assert_eq!(kv.get(b"fresh").unwrap(), None);
        assert!(storage.get_state_diff(5).unwrap().is_none());
        assert!(!storage.is_block_persisted(&block.id()).unwrap());
        assert!(matches!(
            storage.get_block_by_height(5),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn delete_below_finality_is_refused() {
        let (storage, kv) = setup();
        let block = make_block(3, vec![0x01; 32], vec![]);
        let state = StateStore::new(Arc::clone(&kv));
        storage.save_block(&block, state, 3, false).unwrap();

        let undo_state = StateStore::new(Arc::clone(&kv));
        let result = storage.delete_block(&block, undo_state, false);
        assert!(matches!(
            result,
            Err(StorageError::BelowFinality {
                height: 3,
                finalized: 3
            })
        ));
        // Block untouched.
        assert!(storage.is_block_persisted(&block.id()).unwrap());
    }

    #[test]
    fn delete_with_save_temp_buffers_the_block() {
        let (storage, kv) = setup();
        let keypair = Keypair::generate();
        let block = make_block(2, vec![0x01; 32], vec![make_tx(&keypair, 1)]);

        let state = StateStore::new(Arc::clone(&kv));
        storage.save_block(&block, state, 0, false).unwrap();

        let undo_state = StateStore::new(Arc::clone(&kv));
        storage.delete_block(&block, undo_state, true).unwrap();

        let temp = storage.get_temp_blocks().unwrap();
        assert_eq!(temp.len(), 1);
        assert_eq!(temp[0], block);

        // Re-applying with remove_from_temp clears the buffer entry.
        let state = StateStore::new(Arc::clone(&kv));
        storage.save_block(&block, state, 0, true).unwrap();
        assert!(storage.get_temp_blocks().unwrap().is_empty());
    }

    #[test]
    fn clear_temp_blocks_empties_buffer() {
        let (storage, kv) = setup();
        for height in [7u32, 8, 9] {
            let block = make_block(height, vec![0x01; 32], vec![]);
            let state = StateStore::new(Arc::clone(&kv));
            storage.save_block(&block, state, 0, false).unwrap();
            let undo = StateStore::new(Arc::clone(&kv));
            storage.delete_block(&block, undo, true).unwrap();
        }
        assert_eq!(storage.get_temp_blocks().unwrap().len(), 3);
        storage.clear_temp_blocks().unwrap();
        assert!(storage.get_temp_blocks().unwrap().is_empty());
    }

    #[test]
    fn diff_purge_below_finality() {
        let (storage, kv) = setup();
        let mut previous = vec![0x01; 32];
        for height in 1..=4u32 {
            let block = make_block(height, previous.clone(), vec![]);
            previous = block.id();
            let mut state = StateStore::new(Arc::clone(&kv));
            state
                .set(format!("k{height}").as_bytes(), vec![height as u8])
                .unwrap();
            // Finality trails the tip by two blocks.
            let finalized = height.saturating_sub(2);
            storage.save_block(&block, state, finalized, false).unwrap();
        }

        // Heights below the finalized height (2) have been purged.
        assert!(storage.get_state_diff(1).unwrap().is_none());
        assert!(storage.get_state_diff(2).unwrap().is_some());
        assert!(storage.get_state_diff(3).unwrap().is_some());
        assert!(storage.get_state_diff(4).unwrap().is_some());
    }

    #[test]
    fn highest_common_block_id_picks_first_match() {
        let (storage, kv) = setup();
        let block = make_block(1, vec![0x01; 32], vec![]);
        let state = StateStore::new(Arc::clone(&kv));
        storage.save_block(&block, state, 0, false).unwrap();

        let unknown = vec![0xEE; 32];
        let found = storage
            .highest_common_block_id(&[unknown.clone(), block.id()])
            .unwrap();
        assert_eq!(found, Some(block.id()));

        let none = storage.highest_common_block_id(&[unknown]).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn empty_payload_has_no_tx_index() {
        let (storage, kv) = setup();
        let block = make_block(1, vec![0x01; 32], vec![]);
        let state = StateStore::new(Arc::clone(&kv));
        storage.save_block(&block, state, 0, false).unwrap();

        assert!(!kv.exists(&storage_keys::tx_block_id(&block.id())).unwrap());
        assert!(storage.get_block_by_id(&block.id()).unwrap().payload.is_empty());
    }
}
