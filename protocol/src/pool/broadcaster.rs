//! # Transaction Broadcaster
//!
//! Batches pending transaction ids into periodic announcements. Ids are
//! queued in arrival order and deduplicated; every release window the
//! first [`BROADCAST_RELEASE_LIMIT`] ids are drained, filtered to those
//! still in the pool, and published as one
//! `app:transaction:announce { transactionIds }` notification.
//!
//! Overflow is handled by waiting: an id stays queued until a release
//! window picks it up or its transaction leaves the pool. Dropped
//! transactions are filtered at release time and never announced.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::config::{BROADCAST_INTERVAL_MS, BROADCAST_RELEASE_LIMIT};
use crate::pool::TransactionPool;

/// Event published for each non-empty release window.
pub const EVENT_TRANSACTION_ANNOUNCE: &str = "app:transaction:announce";

#[derive(Default)]
struct Queue {
    order: VecDeque<Vec<u8>>,
    known: HashSet<Vec<u8>>,
}

/// Rate-limited announcement scheduler for pool transactions.
pub struct Broadcaster {
    pool: Arc<TransactionPool>,
    bus: Arc<Bus>,
    queue: Mutex<Queue>,
    release_limit: usize,
}

impl Broadcaster {
    pub fn new(pool: Arc<TransactionPool>, bus: Arc<Bus>) -> Self {
        Self {
            pool,
            bus,
            queue: Mutex::new(Queue::default()),
            release_limit: BROADCAST_RELEASE_LIMIT,
        }
    }

    /// Queue a transaction id for announcement. Already-queued ids are
    /// ignored.
    pub fn enqueue(&self, id: Vec<u8>) {
        let mut queue = self.queue.lock();
        if queue.known.insert(id.clone()) {
            queue.order.push_back(id);
        }
    }

    /// Number of ids waiting for a release window.
    pub fn queued(&self) -> usize {
        self.queue.lock().order.len()
    }

    /// Drain one release window: up to `release_limit` ids, filtered to
    /// those still pooled, published as a single announcement. Returns
    /// the announced ids.
    pub fn release(&self) -> Vec<Vec<u8>> {
        let drained: Vec<Vec<u8>> = {
            let mut queue = self.queue.lock();
            let count = self.release_limit.min(queue.order.len());
            let drained: Vec<Vec<u8>> = queue.order.drain(..count).collect();
            for id in &drained {
                queue.known.remove(id);
            }
            drained
        };

        let announced: Vec<Vec<u8>> = drained
            .into_iter()
            .filter(|id| self.pool.contains(id))
            .collect();
        if announced.is_empty() {
            return announced;
        }

        let payload = json!({
            "transactionIds": announced.iter().map(hex::encode).collect::<Vec<_>>(),
        });
        if let Err(error) = self.bus.publish(EVENT_TRANSACTION_ANNOUNCE, &payload) {
            warn!(%error, "transaction announcement failed");
        } else {
            debug!(count = announced.len(), "announced transactions");
        }
        announced
    }

    /// Spawn the periodic release task. Runs until aborted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(BROADCAST_INTERVAL_MS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                broadcaster.release();
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
