//! # P2P Transport Handlers
//!
//! The node's adversarial boundary. Every handler here assumes the peer
//! is hostile: requests are schema-validated, rate-limited, and size-
//! capped before touching the chain, and violations raise penalties
//! through the bus (`app:network:applyPenalty`), which the socket layer
//! translates into peer scoring.
//!
//! The socket layer itself is out of scope; it is reached only through
//! the [`PeerClient`] trait, and inbound frames arrive as canonical
//! codec bytes.
//!
//! | violation                          | penalty |
//! |------------------------------------|---------|
//! | malformed / oversized request      | 100     |
//! | invalid transaction in response    | 100     |
//! | RPC rate limit exceeded            | 10      |

pub mod rate_limiter;

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::chain::{Block, Chain};
use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::config::{MAX_COMMON_BLOCK_IDS, MAX_GET_TRANSACTIONS, PENALTY_INVALID, PENALTY_RATE_LIMIT};
use crate::pool::{Broadcaster, TransactionPool};
use crate::processor::{Processor, ProcessorError, EVENT_TRANSACTION_NEW};
use crate::storage::StorageError;
use crate::transaction::Transaction;

pub use rate_limiter::RateLimiter;

/// Bus event carrying peer penalties to the socket layer.
pub const EVENT_APPLY_PENALTY: &str = "app:network:applyPenalty";

const RPC_GET_TRANSACTIONS: &str = "getTransactions";
const RPC_POST_ANNOUNCEMENT: &str = "postTransactionsAnnouncement";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failures. Variants that carry a penalty have already
/// published it when the handler returns.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limit exceeded for {rpc}")]
    RateLimit { rpc: &'static str },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid transaction from peer: {0}")]
    InvalidTransaction(String),

    #[error("peer request failed: {0}")]
    PeerRequest(String),

    #[error("block processing failed: {0}")]
    Processing(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Peer client
// ---------------------------------------------------------------------------

/// The transport's only view of the socket layer: request/response
/// against a single peer, canonical bytes in both directions.
pub trait PeerClient: Send + Sync {
    fn request(
        &self,
        peer_id: &str,
        procedure: &str,
        data: &[u8],
    ) -> Result<Vec<u8>, TransportError>;
}

/// Placeholder client for nodes running without a P2P stack.
pub struct NoopPeerClient;

impl PeerClient for NoopPeerClient {
    fn request(
        &self,
        _peer_id: &str,
        procedure: &str,
        _data: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::PeerRequest(format!(
            "no peer network available for {procedure}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// `getHighestCommonBlock` request: `{ ids(1) bytes[] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetHighestCommonBlockRequest {
    pub ids: Vec<Vec<u8>>,
}

impl Encode for GetHighestCommonBlockRequest {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_bytes(1, &self.ids);
    }
}

impl Decode for GetHighestCommonBlockRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            ids: reader.read_repeated_bytes(1)?,
        })
    }
}

/// `getTransactions` request: `{ transaction_ids(1) bytes[] }`.
/// An empty list means "whatever you have".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTransactionsRequest {
    pub transaction_ids: Vec<Vec<u8>>,
}

impl Encode for GetTransactionsRequest {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_bytes(1, &self.transaction_ids);
    }
}

impl Decode for GetTransactionsRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            transaction_ids: reader.read_repeated_bytes(1)?,
        })
    }
}

/// `getTransactions` response: `{ transactions(1) bytes[] }`, each
/// element a canonical transaction encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionsResponse {
    pub transactions: Vec<Vec<u8>>,
}

impl Encode for TransactionsResponse {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_bytes(1, &self.transactions);
    }
}

impl Decode for TransactionsResponse {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            transactions: reader.read_repeated_bytes(1)?,
        })
    }
}

/// Inbound transaction announcement: `{ transaction_ids(1) bytes[] }`.
pub type PostTransactionsAnnouncement = GetTransactionsRequest;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Per-peer protocol handlers.
pub struct Transport {
    chain: Arc<Chain>,
    pool: Arc<TransactionPool>,
    broadcaster: Arc<Broadcaster>,
    processor: Arc<Processor>,
    bus: Arc<Bus>,
    peers: Arc<dyn PeerClient>,
    rate_limiter: RateLimiter,
}

impl Transport {
    pub fn new(
        chain: Arc<Chain>,
        pool: Arc<TransactionPool>,
        broadcaster: Arc<Broadcaster>,
        processor: Arc<Processor>,
        bus: Arc<Bus>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            chain,
            pool,
            broadcaster,
            processor,
            bus,
            peers,
            rate_limiter: RateLimiter::default(),
        }
    }

    /// Inbound block announcement: decode and hand to the processor.
    /// A block that fails consensus validation costs the announcing
    /// peer penalty 100.
    pub async fn handle_event_post_block(
        &self,
        data: &[u8],
        peer_id: &str,
    ) -> Result<(), TransportError> {
        let block = match Block::decode_from_bytes(data) {
            Ok(block) => block,
            Err(error) => {
                self.apply_penalty(peer_id, PENALTY_INVALID);
                return Err(TransportError::InvalidRequest(format!(
                    "malformed block: {error}"
                )));
            }
        };
        match self
            .processor
            .process(block, Some(peer_id.to_string()))
            .await
        {
            Ok(()) => Ok(()),
            Err(ProcessorError::ApplyPenalty { reason }) => {
                self.apply_penalty(peer_id, PENALTY_INVALID);
                Err(TransportError::Processing(reason))
            }
            Err(error) => Err(TransportError::Processing(error.to_string())),
        }
    }

    /// Accept a locally submitted or relayed transaction: validate,
    /// pool, queue for announcement. A duplicate id is a silent no-op.
    pub fn handle_broadcast_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<(), TransportError> {
        self.processor
            .validate_transaction(&transaction)
            .map_err(|error| TransportError::InvalidTransaction(error.to_string()))?;

        let id = transaction.id();
        if self.pool.contains(&id) {
            return Ok(());
        }
        if let Err(error) = self.pool.add(transaction) {
            debug!(%error, "transaction not pooled");
            return Ok(());
        }
        self.broadcaster.enqueue(id.clone());
        self.publish(
            EVENT_TRANSACTION_NEW,
            json!({ "transactionId": hex::encode(&id) }),
        );
        Ok(())
    }

    /// `getHighestCommonBlock`: the first of the peer's ids that exists
    /// on this chain, or `None`. Malformed input costs penalty 100.
    pub fn handle_rpc_get_highest_common_block(
        &self,
        data: &[u8],
        peer_id: &str,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let request = match GetHighestCommonBlockRequest::decode_from_bytes(data) {
            Ok(request) if self.valid_id_list(&request.ids, MAX_COMMON_BLOCK_IDS) => request,
            _ => {
                self.apply_penalty(peer_id, PENALTY_INVALID);
                return Err(TransportError::InvalidRequest(
                    "malformed getHighestCommonBlock request".into(),
                ));
            }
        };
        Ok(self
            .chain
            .data_access()
            .highest_common_block_id(&request.ids)?)
    }

    /// `getTransactions`: serve from the pool first, then one batched
    /// DB lookup. Rate limited at 3 calls per 10 s per peer (penalty
    /// 10); more than [`MAX_GET_TRANSACTIONS`] ids costs penalty 100.
    pub fn handle_rpc_get_transactions(
        &self,
        data: &[u8],
        peer_id: &str,
    ) -> Result<Vec<Transaction>, TransportError> {
        if !self.rate_limiter.allow(peer_id, RPC_GET_TRANSACTIONS) {
            self.apply_penalty(peer_id, PENALTY_RATE_LIMIT);
            return Err(TransportError::RateLimit {
                rpc: RPC_GET_TRANSACTIONS,
            });
        }

        let request = match GetTransactionsRequest::decode_from_bytes(data) {
            Ok(request) => request,
            Err(_) => {
                self.apply_penalty(peer_id, PENALTY_INVALID);
                return Err(TransportError::InvalidRequest(
                    "malformed getTransactions request".into(),
                ));
            }
        };

        if request.transaction_ids.is_empty() {
            return Ok(self.pool.merged(MAX_GET_TRANSACTIONS));
        }
        if request.transaction_ids.len() > MAX_GET_TRANSACTIONS
            || !self.valid_id_list(&request.transaction_ids, MAX_GET_TRANSACTIONS)
        {
            self.apply_penalty(peer_id, PENALTY_INVALID);
            return Err(TransportError::InvalidRequest(format!(
                "requested more than {MAX_GET_TRANSACTIONS} transactions"
            )));
        }

        let mut found = Vec::with_capacity(request.transaction_ids.len());
        let mut unresolved = Vec::new();
        for id in &request.transaction_ids {
            match self.pool.get(id) {
                Some(tx) => found.push(tx),
                None => unresolved.push(id.clone()),
            }
        }
        found.extend(self.chain.data_access().get_transactions(&unresolved)?);
        Ok(found)
    }

    /// Inbound `postTransactionsAnnouncement`: filter ids this node
    /// already knows, fetch the rest from the announcing peer, validate
    /// each, and pool them. Invalid payloads cost penalty 100; pool
    /// rejections (duplicate, capacity) cost nothing.
    pub fn handle_event_post_transactions_announcement(
        &self,
        data: &[u8],
        peer_id: &str,
    ) -> Result<(), TransportError> {
        if !self.rate_limiter.allow(peer_id, RPC_POST_ANNOUNCEMENT) {
            self.apply_penalty(peer_id, PENALTY_RATE_LIMIT);
            return Err(TransportError::RateLimit {
                rpc: RPC_POST_ANNOUNCEMENT,
            });
        }

        let announcement = match PostTransactionsAnnouncement::decode_from_bytes(data) {
            Ok(announcement)
                if self.valid_id_list(&announcement.transaction_ids, MAX_GET_TRANSACTIONS) =>
            {
                announcement
            }
            _ => {
                self.apply_penalty(peer_id, PENALTY_INVALID);
                return Err(TransportError::InvalidRequest(
                    "malformed transaction announcement".into(),
                ));
            }
        };

        let mut unknown = Vec::new();
        for id in announcement.transaction_ids {
            if !self.pool.contains(&id)
                && !self.chain.data_access().is_transaction_persisted(&id)?
            {
                unknown.push(id);
            }
        }
        if unknown.is_empty() {
            return Ok(());
        }

        let request = GetTransactionsRequest {
            transaction_ids: unknown,
        };
        let response_bytes = self.peers.request(
            peer_id,
            RPC_GET_TRANSACTIONS,
            &request.encode_to_bytes(),
        )?;
        let response = TransactionsResponse::decode_from_bytes(&response_bytes).map_err(|_| {
            self.apply_penalty(peer_id, PENALTY_INVALID);
            TransportError::InvalidTransaction("malformed getTransactions response".into())
        })?;

        for tx_bytes in response.transactions {
            let transaction = match Transaction::decode_from_bytes(&tx_bytes) {
                Ok(transaction) => transaction,
                Err(error) => {
                    self.apply_penalty(peer_id, PENALTY_INVALID);
                    return Err(TransportError::InvalidTransaction(error.to_string()));
                }
            };
            if let Err(error) = self.processor.validate_transaction(&transaction) {
                self.apply_penalty(peer_id, PENALTY_INVALID);
                return Err(TransportError::InvalidTransaction(error.to_string()));
            }

            let id = transaction.id();
            match self.pool.add(transaction) {
                Ok(()) => {
                    self.broadcaster.enqueue(id.clone());
                    self.publish(
                        EVENT_TRANSACTION_NEW,
                        json!({ "transactionId": hex::encode(&id) }),
                    );
                }
                // Duplicate or capacity: not the peer's fault.
                Err(error) => debug!(%error, "announced transaction not pooled"),
            }
        }
        Ok(())
    }

    // -- Internals ------------------------------------------------------------

    fn valid_id_list(&self, ids: &[Vec<u8>], max: usize) -> bool {
        ids.len() <= max && ids.iter().all(|id| id.len() == 32)
    }

    fn apply_penalty(&self, peer_id: &str, penalty: u32) {
        warn!(peer_id, penalty, "applying peer penalty");
        self.publish(
            EVENT_APPLY_PENALTY,
            json!({ "peerId": peer_id, "penalty": penalty }),
        );
    }

    fn publish(&self, event: &str, payload: serde_json::Value) {
        if let Err(error) = self.bus.publish(event, &payload) {
            warn!(event, %error, "event publication failed");
        }
    }
}
