//! # Transactional State Overlay
//!
//! One `StateStore` exists per block application. It shields the KV store
//! from in-flight mutations and records enough bookkeeping to make every
//! block reversible:
//!
//! - The first touch of a key snapshots the underlying KV value.
//! - Writes and deletes stay in the overlay until `finalize`.
//! - `finalize` flushes the mutations into a [`WriteBatch`] and returns a
//!   [`StateDiff`] that classifies every dirty key as created, updated,
//!   or deleted, carrying pre-images for the latter two.
//!
//! The diff invariant: applying the inverse of the diff over the
//! post-state yields the pre-state exactly. Dropping a store without
//! finalizing releases every recorded mutation; the KV store is never
//! touched.
//!
//! Two logical domains are exposed: `account` (addresses under the
//! ACCOUNTS prefix) and `chain state` (opaque module keys under the
//! CHAIN_STATE prefix).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::account::Account;
use crate::codec::{CodecError, Decode, Encode, Reader, Writer};

use super::keys;
use super::kv::{KvStore, StorageError, WriteBatch};

// ---------------------------------------------------------------------------
// StateDiff
// ---------------------------------------------------------------------------

/// A pre-image entry for an updated or deleted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub key: Vec<u8>,
    /// The value the key held before this block.
    pub value: Vec<u8>,
}

impl Encode for DiffEntry {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.key);
        writer.write_bytes(2, &self.value);
    }
}

impl Decode for DiffEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            key: reader.read_bytes(1)?,
            value: reader.read_bytes(2)?,
        })
    }
}

/// The minimal record of key-space mutations over one block.
///
/// `created` lists keys that did not exist before; `updated` and
/// `deleted` carry the pre-block values. Inverting the diff means:
/// delete every created key, restore every updated and deleted value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    pub created: Vec<Vec<u8>>,
    pub updated: Vec<DiffEntry>,
    pub deleted: Vec<DiffEntry>,
}

impl Encode for StateDiff {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_bytes(1, &self.created);
        writer.write_repeated_objects(2, &self.updated);
        writer.write_repeated_objects(3, &self.deleted);
    }
}

impl Decode for StateDiff {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            created: reader.read_repeated_bytes(1)?,
            updated: reader.read_repeated_objects(2)?,
            deleted: reader.read_repeated_objects(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Per-key overlay bookkeeping.
#[derive(Debug, Clone)]
struct Entry {
    /// Value in the KV store when the key was first touched. `None` when
    /// the key did not exist.
    snapshot: Option<Vec<u8>>,
    /// Value as seen through the overlay. `None` after a delete.
    current: Option<Vec<u8>>,
    /// Whether the overlay diverged from the snapshot.
    dirty: bool,
}

/// Transactional overlay over the KV store for one block application.
///
/// Keys are tracked in a `BTreeMap` so diff output and root computation
/// iterate in a deterministic order regardless of touch order.
#[derive(Debug)]
pub struct StateStore {
    kv: Arc<KvStore>,
    entries: BTreeMap<Vec<u8>, Entry>,
}

impl StateStore {
    /// A fresh overlay over the current KV state.
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self {
            kv,
            entries: BTreeMap::new(),
        }
    }

    /// Ensure `key` has an entry, snapshotting the underlying value on
    /// first touch.
    fn entry(&mut self, key: &[u8]) -> Result<&mut Entry, StorageError> {
        if !self.entries.contains_key(key) {
            let snapshot = self.kv.get(key)?;
            self.entries.insert(
                key.to_vec(),
                Entry {
                    current: snapshot.clone(),
                    snapshot,
                    dirty: false,
                },
            );
        }
        Ok(self.entries.get_mut(key).expect("entry just inserted"))
    }

    /// Read through the overlay.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entry(key)?.current.clone())
    }

    /// Write a value into the overlay.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        let entry = self.entry(key)?;
        entry.current = Some(value);
        entry.dirty = true;
        Ok(())
    }

    /// Delete a key through the overlay, recording the previous value.
    pub fn del(&mut self, key: &[u8]) -> Result<(), StorageError> {
        let entry = self.entry(key)?;
        entry.current = None;
        entry.dirty = true;
        Ok(())
    }

    /// True when the key exists through the overlay.
    pub fn exists(&mut self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.entry(key)?.current.is_some())
    }

    // -- Account domain -----------------------------------------------------

    /// Fetch an account by address. `None` when the address has never
    /// been written.
    pub fn get_account(&mut self, address: &[u8]) -> Result<Option<Account>, StorageError> {
        match self.get(&keys::account(address))? {
            Some(bytes) => Ok(Some(Account::decode_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch an account, creating a default one in the overlay view when
    /// absent. The default is not persisted until it is `set`.
    pub fn get_account_or_default(&mut self, address: &[u8]) -> Result<Account, StorageError> {
        Ok(self
            .get_account(address)?
            .unwrap_or_else(|| Account::with_address(address.to_vec())))
    }

    /// Write an account.
    pub fn set_account(&mut self, account: &Account) -> Result<(), StorageError> {
        let key = keys::account(&account.address);
        self.set(&key, account.encode_to_bytes())
    }

    // -- Chain-state domain --------------------------------------------------

    /// Fetch a module-scoped chain-state value.
    pub fn get_chain_state(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(&keys::chain_state(key))
    }

    /// Write a module-scoped chain-state value.
    pub fn set_chain_state(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.set(&keys::chain_state(key), value)
    }

    // -- Finalization ---------------------------------------------------------

    /// Commitment to this overlay's mutations, chained onto the parent
    /// state root.
    ///
    /// Deterministic: dirty keys are folded in sorted order with their
    /// final values (a tombstone byte for deletions). Two nodes applying
    /// the same block over the same parent state compute the same root.
    pub fn compute_root(&self, parent: &[u8; 32]) -> [u8; 32] {
        let mut material = Vec::new();
        for (key, entry) in self.entries.iter().filter(|(_, e)| e.dirty) {
            material.extend_from_slice(&(key.len() as u32).to_be_bytes());
            material.extend_from_slice(key);
            match &entry.current {
                Some(value) => {
                    material.push(1);
                    material.extend_from_slice(&(value.len() as u32).to_be_bytes());
                    material.extend_from_slice(value);
                }
                None => material.push(0),
            }
        }
        crate::crypto::hash_chain(parent, &material)
    }

    /// Flush the accumulated mutations into `batch` and return the diff.
    ///
    /// Classification per dirty key:
    /// - no snapshot, final value present  -> created
    /// - snapshot and final value present  -> updated (pre-image kept)
    /// - snapshot present, final absent    -> deleted (pre-image kept)
    ///
    /// Keys that were only read are ignored. A key created and deleted
    /// within the same block never existed; it is skipped entirely.
    pub fn finalize(self, batch: &mut WriteBatch) -> StateDiff {
        let mut diff = StateDiff::default();
        for (key, entry) in self.entries {
            if !entry.dirty {
                continue;
            }
            match (entry.snapshot, entry.current) {
                (None, Some(value)) => {
                    batch.put(key.clone(), value);
                    diff.created.push(key);
                }
                (Some(snapshot), Some(value)) => {
                    // Unchanged rewrites still count as updates; the diff
                    // must be able to restore the exact pre-image.
                    batch.put(key.clone(), value);
                    diff.updated.push(DiffEntry {
                        key,
                        value: snapshot,
                    });
                }
                (Some(snapshot), None) => {
                    batch.del(key.clone());
                    diff.deleted.push(DiffEntry {
                        key,
                        value: snapshot,
                    });
                }
                (None, None) => {}
            }
        }
        diff
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kv() -> Arc<KvStore> {
        Arc::new(KvStore::open_temporary().expect("temp store"))
    }

    #[test]
    fn get_reads_through_to_kv_and_caches_snapshot() {
        let kv = kv();
        kv.put(b"k", b"underlying").unwrap();

        let mut store = StateStore::new(Arc::clone(&kv));
        assert_eq!(store.get(b"k").unwrap(), Some(b"underlying".to_vec()));

        // Underlying change after the snapshot is not observed.
        kv.put(b"k", b"changed").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"underlying".to_vec()));
    }

    #[test]
    fn set_is_visible_through_overlay_only() {
        let kv = kv();
        let mut store = StateStore::new(Arc::clone(&kv));

        store.set(b"k", b"v".to_vec()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(kv.get(b"k").unwrap(), None);
    }

    #[test]
    fn finalize_classifies_created_updated_deleted() {
        let kv = kv();
        kv.put(b"upd", b"before").unwrap();
        kv.put(b"del", b"gone").unwrap();

        let mut store = StateStore::new(Arc::clone(&kv));
        store.set(b"new", b"fresh".to_vec()).unwrap();
        store.set(b"upd", b"after".to_vec()).unwrap();
        store.del(b"del").unwrap();
        // Read-only touch must not appear in the diff.
        kv.put(b"ro", b"read").unwrap();
        store.get(b"ro").unwrap();

        let mut batch = WriteBatch::new();
        let diff = store.finalize(&mut batch);

        assert_eq!(diff.created, vec![b"new".to_vec()]);
        assert_eq!(
            diff.updated,
            vec![DiffEntry {
                key: b"upd".to_vec(),
                value: b"before".to_vec()
            }]
        );
        assert_eq!(
            diff.deleted,
            vec![DiffEntry {
                key: b"del".to_vec(),
                value: b"gone".to_vec()
            }]
        );

        kv.write(batch).unwrap();
        assert_eq!(kv.get(b"new").unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(kv.get(b"upd").unwrap(), Some(b"after".to_vec()));
        assert_eq!(kv.get(b"del").unwrap(), None);
    }

    #[test]
    fn inverse_of_diff_restores_pre_state() {
        let kv = kv();
        kv.put(b"a", b"a0").unwrap();
        kv.put(b"b", b"b0").unwrap();

        let mut store = StateStore::new(Arc::clone(&kv));
        store.set(b"a", b"a1".to_vec()).unwrap();
        store.del(b"b").unwrap();
        store.set(b"c", b"c1".to_vec()).unwrap();

        let mut batch = WriteBatch::new();
        let diff = store.finalize(&mut batch);
        kv.write(batch).unwrap();

        // Apply the inverse.
        let mut undo = WriteBatch::new();
        for key in &diff.created {
            undo.del(key.clone());
        }
        for entry in diff.updated.iter().chain(diff.deleted.iter()) {
            undo.put(entry.key.clone(), entry.value.clone());
        }
        kv.write(undo).unwrap();

        assert_eq!(kv.get(b"a").unwrap(), Some(b"a0".to_vec()));
        assert_eq!(kv.get(b"b").unwrap(), Some(b"b0".to_vec()));
        assert_eq!(kv.get(b"c").unwrap(), None);
    }

    #[test]
    fn create_then_delete_never_existed() {
        let kv = kv();
        let mut store = StateStore::new(Arc::clone(&kv));

        store.set(b"ephemeral", b"v".to_vec()).unwrap();
        store.del(b"ephemeral").unwrap();

        let mut batch = WriteBatch::new();
        let diff = store.finalize(&mut batch);
        assert_eq!(diff, StateDiff::default());
        assert!(batch.is_empty());
    }

    #[test]
    fn drop_without_finalize_touches_nothing() {
        let kv = kv();
        kv.put(b"k", b"v").unwrap();
        {
            let mut store = StateStore::new(Arc::clone(&kv));
            store.set(b"k", b"mutated".to_vec()).unwrap();
            store.set(b"other", b"x".to_vec()).unwrap();
        }
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(kv.get(b"other").unwrap(), None);
    }

    #[test]
    fn account_domain_roundtrip() {
        let kv = kv();
        let mut store = StateStore::new(Arc::clone(&kv));

        let address = vec![5u8; 20];
        assert!(store.get_account(&address).unwrap().is_none());

        let mut account = store.get_account_or_default(&address).unwrap();
        account.balance = 777;
        store.set_account(&account).unwrap();

        let read_back = store.get_account(&address).unwrap().unwrap();
        assert_eq!(read_back.balance, 777);
        assert_eq!(read_back.address, address);
    }

    #[test]
    fn chain_state_domain_is_separate_from_accounts() {
        let kv = kv();
        let mut store = StateStore::new(Arc::clone(&kv));

        store.set_chain_state(b"dpos:validators", b"v".to_vec()).unwrap();
        assert_eq!(
            store.get_chain_state(b"dpos:validators").unwrap(),
            Some(b"v".to_vec())
        );
        // Same raw bytes as an address resolve to a different key.
        assert!(store.get_account(b"dpos:validators").unwrap().is_none());
    }

    #[test]
    fn compute_root_is_deterministic_and_order_insensitive() {
        let kv1 = kv();
        let kv2 = kv();
        let parent = [9u8; 32];

        let mut store1 = StateStore::new(kv1);
        store1.set(b"a", b"1".to_vec()).unwrap();
        store1.set(b"b", b"2".to_vec()).unwrap();

        let mut store2 = StateStore::new(kv2);
        store2.set(b"b", b"2".to_vec()).unwrap();
        store2.set(b"a", b"1".to_vec()).unwrap();

        assert_eq!(store1.compute_root(&parent), store2.compute_root(&parent));
    }

    #[test]
    fn compute_root_depends_on_parent_and_values() {
        let kv = kv();
        let mut store = StateStore::new(kv);
        store.set(b"a", b"1".to_vec()).unwrap();

        let root1 = store.compute_root(&[0u8; 32]);
        let root2 = store.compute_root(&[1u8; 32]);
        assert_ne!(root1, root2);
    }

    #[test]
    fn diff_roundtrips_through_codec() {
        let diff = StateDiff {
            created: vec![b"c1".to_vec(), b"c2".to_vec()],
            updated: vec![DiffEntry {
                key: b"u".to_vec(),
                value: b"pre".to_vec(),
            }],
            deleted: vec![DiffEntry {
                key: b"d".to_vec(),
                value: b"old".to_vec(),
            }],
        };
        let bytes = diff.encode_to_bytes();
        assert_eq!(StateDiff::decode_from_bytes(&bytes).unwrap(), diff);
    }
}
