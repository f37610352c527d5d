//! # Ordered Key/Value Store
//!
//! The single owner of on-disk bytes, built on sled's embedded B+ tree.
//! Everything above this layer speaks in terms of `get`/`put`/`del`,
//! prefix-ordered range scans, and atomic write batches.
//!
//! ## Atomicity
//!
//! A [`WriteBatch`] is an append-only queue of puts and deletes. `write`
//! applies the whole queue through a single `sled::Batch`: readers observe
//! either the pre-batch or the post-batch state, never a partial one.
//! Single-process access is assumed; there is no cross-process locking.

use std::path::Path;

use thiserror::Error;

use crate::codec::CodecError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key does not exist. Routine for lookups by id;
    /// callers that treat absence as normal use the `Option` accessors
    /// instead.
    #[error("key not found")]
    NotFound,

    /// An I/O failure in the underlying store. The current operation is
    /// aborted; the system keeps running.
    #[error("database error: {0}")]
    Io(#[from] sled::Error),

    /// Stored bytes failed canonical decoding. Indicates on-disk
    /// corruption or a version mismatch.
    #[error("corrupted value: {0}")]
    Corrupted(#[from] CodecError),

    /// Refused to delete a block at or below the finalized height.
    #[error("block at height {height} is final (finalized height {finalized})")]
    BelowFinality { height: u32, finalized: u32 },
}

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// An append-only queue of mutations, applied atomically by
/// [`KvStore::write`].
///
/// Operations are applied in insertion order; a later operation on the
/// same key wins.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

#[derive(Debug)]
enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queue a delete.
    pub fn del(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Del { key });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

/// Ordered key/value database handle.
///
/// Cheap to clone; sled trees are internally reference-counted and
/// thread-safe (lock-free concurrent reads, serialized writes). Writer
/// discipline above this layer is the processor's job, not the store's.
#[derive(Debug, Clone)]
pub struct KvStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl KvStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("chain")?;
        Ok(Self { db, tree })
    }

    /// Create a temporary in-memory database, cleaned up on drop.
    /// For tests.
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("chain")?;
        Ok(Self { db, tree })
    }

    /// Fetch a value. `None` when the key does not exist.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    /// Fetch a value, treating absence as an error.
    pub fn must_get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        self.get(key)?.ok_or(StorageError::NotFound)
    }

    /// Store a single value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    /// Delete a single key. Deleting an absent key is a no-op.
    pub fn del(&self, key: &[u8]) -> Result<(), StorageError> {
        self.tree.remove(key)?;
        Ok(())
    }

    /// True when the key exists.
    pub fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.tree.contains_key(key)?)
    }

    /// Apply a batch atomically and flush it to disk.
    pub fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => sled_batch.insert(key, value),
                BatchOp::Del { key } => sled_batch.remove(key),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Scan `[gte, lte]` in lexicographic order, newest-last. With
    /// `reverse` the iteration order flips; `limit` caps the number of
    /// returned pairs.
    pub fn range(
        &self,
        gte: &[u8],
        lte: &[u8],
        reverse: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let iter = self.tree.range(gte.to_vec()..=lte.to_vec());
        let mut pairs = Vec::new();
        if reverse {
            for entry in iter.rev() {
                let (key, value) = entry?;
                pairs.push((key.to_vec(), value.to_vec()));
                if limit.is_some_and(|l| pairs.len() >= l) {
                    break;
                }
            }
        } else {
            for entry in iter {
                let (key, value) = entry?;
                pairs.push((key.to_vec(), value.to_vec()));
                if limit.is_some_and(|l| pairs.len() >= l) {
                    break;
                }
            }
        }
        Ok(pairs)
    }

    /// Delete every key in `[gte, lt)`. Returns the number of deleted
    /// keys. The deletion itself is batched and atomic.
    pub fn clear(&self, gte: &[u8], lt: &[u8]) -> Result<usize, StorageError> {
        let mut batch = sled::Batch::default();
        let mut count = 0usize;
        for entry in self.tree.range(gte.to_vec()..lt.to_vec()) {
            let (key, _) = entry?;
            batch.remove(key);
            count += 1;
        }
        self.tree.apply_batch(batch)?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KvStore {
        KvStore::open_temporary().expect("temp store")
    }

    #[test]
    fn get_put_del_exists() {
        let kv = store();
        assert_eq!(kv.get(b"k").unwrap(), None);
        assert!(!kv.exists(b"k").unwrap());

        kv.put(b"k", b"v").unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(kv.exists(b"k").unwrap());

        kv.del(b"k").unwrap();
        assert_eq!(kv.get(b"k").unwrap(), None);
    }

    #[test]
    fn must_get_reports_not_found() {
        let kv = store();
        assert!(matches!(
            kv.must_get(b"missing"),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn batch_applies_all_or_nothing_ordering() {
        let kv = store();
        kv.put(b"a", b"old").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"new".to_vec());
        batch.put(b"b".to_vec(), b"1".to_vec());
        batch.del(b"a".to_vec());
        kv.write(batch).unwrap();

        // Later ops win over earlier ops on the same key.
        assert_eq!(kv.get(b"a").unwrap(), None);
        assert_eq!(kv.get(b"b").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn range_is_lexicographic_and_inclusive() {
        let kv = store();
        for key in [b"a1", b"a2", b"a3", b"b1"] {
            kv.put(key, b"x").unwrap();
        }

        let pairs = kv.range(b"a1", b"a3", false, None).unwrap();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a1".to_vec(), b"a2".to_vec(), b"a3".to_vec()]);
    }

    #[test]
    fn range_reverse_and_limit() {
        let kv = store();
        for key in [b"a1", b"a2", b"a3"] {
            kv.put(key, b"x").unwrap();
        }

        let pairs = kv.range(b"a1", b"a3", true, Some(2)).unwrap();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a3".to_vec(), b"a2".to_vec()]);
    }

    #[test]
    fn clear_is_half_open() {
        let kv = store();
        for key in [b"c1", b"c2", b"c3"] {
            kv.put(key, b"x").unwrap();
        }

        let removed = kv.clear(b"c1", b"c3").unwrap();
        assert_eq!(removed, 2);
        assert!(!kv.exists(b"c1").unwrap());
        assert!(!kv.exists(b"c2").unwrap());
        assert!(kv.exists(b"c3").unwrap());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = KvStore::open(dir.path()).unwrap();
            kv.put(b"durable", b"yes").unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"batched".to_vec(), b"also".to_vec());
            kv.write(batch).unwrap();
        }
        let kv = KvStore::open(dir.path()).unwrap();
        assert_eq!(kv.get(b"durable").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(kv.get(b"batched").unwrap(), Some(b"also".to_vec()));
    }
}
