//! # Transaction Pool
//!
//! Pending transactions indexed by id, plus a capped ring of recently
//! included ids so peers asking for a transaction that just landed in a
//! block still get an answer from memory.
//!
//! The pool performs no validation itself; callers validate before
//! adding. Thread-safe: the id index is a `DashMap` for lock-free reads
//! on the gossip hot path, the ring is a small mutex.

pub mod broadcaster;

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{MAX_POOL_TRANSACTIONS, RECENTLY_INCLUDED_CAP};
use crate::transaction::Transaction;

pub use broadcaster::Broadcaster;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Pool admission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction already exists in pool")]
    Duplicate,

    #[error("pool is full ({capacity} transactions)")]
    Full { capacity: usize },
}

// ---------------------------------------------------------------------------
// TransactionPool
// ---------------------------------------------------------------------------

/// Thread-safe pending-transaction set.
pub struct TransactionPool {
    pending: DashMap<Vec<u8>, Transaction>,
    recently_included: Mutex<VecDeque<Transaction>>,
    capacity: usize,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(MAX_POOL_TRANSACTIONS)
    }
}

impl TransactionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: DashMap::new(),
            recently_included: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// True when a pending transaction with this id exists.
    pub fn contains(&self, id: &[u8]) -> bool {
        self.pending.contains_key(id)
    }

    /// Admit a validated transaction. Rejects duplicates and overflow.
    pub fn add(&self, transaction: Transaction) -> Result<(), PoolError> {
        let id = transaction.id();
        if self.pending.contains_key(&id) {
            return Err(PoolError::Duplicate);
        }
        if self.pending.len() >= self.capacity {
            return Err(PoolError::Full {
                capacity: self.capacity,
            });
        }
        self.pending.insert(id, transaction);
        Ok(())
    }

    /// Remove and return a pending transaction.
    pub fn remove(&self, id: &[u8]) -> Option<Transaction> {
        self.pending.remove(id).map(|(_, tx)| tx)
    }

    /// Clone of a pending transaction.
    pub fn get(&self, id: &[u8]) -> Option<Transaction> {
        self.pending.get(id).map(|entry| entry.value().clone())
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when no transactions are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move a block's transactions from pending into the
    /// recently-included ring. Called after a block is saved.
    pub fn mark_included(&self, transactions: &[Transaction]) {
        let mut ring = self.recently_included.lock();
        for tx in transactions {
            self.pending.remove(&tx.id());
            ring.push_back(tx.clone());
            while ring.len() > RECENTLY_INCLUDED_CAP {
                ring.pop_front();
            }
        }
    }

    /// Return a block's transactions to the pending set after a
    /// rollback. Duplicates and overflow are silently skipped.
    pub fn return_to_pool(&self, transactions: &[Transaction]) {
        for tx in transactions {
            let _ = self.add(tx.clone());
        }
    }

    /// Pending union recently-included, pending first, capped at
    /// `limit`. Serves peer `getTransactions` requests without ids.
    pub fn merged(&self, limit: usize) -> Vec<Transaction> {
        let mut result: Vec<Transaction> = Vec::with_capacity(limit);
        for entry in self.pending.iter() {
            if result.len() >= limit {
                return result;
            }
            result.push(entry.value().clone());
        }
        let ring = self.recently_included.lock();
        for tx in ring.iter().rev() {
            if result.len() >= limit {
                break;
            }
            let id = tx.id();
            if !result.iter().any(|r| r.id() == id) {
                result.push(tx.clone());
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
