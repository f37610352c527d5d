// Copyright (c) 2026 Meridian Labs. MIT License.
// See LICENSE for details.

//! # Meridian Protocol — Core Library
//!
//! The core of a Delegated-Proof-of-Stake blockchain node: the block
//! processing pipeline together with the state, storage, and peer
//! transport machinery that feeds it. Blocks and transactions arrive
//! from peers, get validated against consensus rules, are applied to a
//! versioned key/value state, and every step is observable over an
//! internal request bus.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - **codec** — canonical, deterministic binary encoding. Equal value,
//!   equal bytes, on every node.
//! - **storage** — the ordered KV store, the per-block state overlay
//!   with reversible diffs, and atomic block persistence.
//! - **chain** — block structures, the canonical tip, header rules.
//! - **bft** — fork choice and monotone finality accounting.
//! - **modules** — registry, hook pipeline, reducers; `token` and
//!   `dpos` as the built-in modules.
//! - **pool** — pending transactions and the batched announcer.
//! - **processor** — the single writer: fork dispatch, the application
//!   pipeline, rollback, event publication.
//! - **transport** — adversarial peer handlers: schema checks, rate
//!   limits, penalties.
//! - **bus** — in-process pub/sub and JSON-RPC request routing.
//!
//! ## Concurrency Discipline
//!
//! One cooperative writer (the processor's job queue) mutates the chain;
//! everything else reads. State stores live for exactly one block
//! application and are either finalized into an atomic batch or dropped
//! without a trace.

pub mod account;
pub mod bft;
pub mod bus;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod modules;
pub mod pool;
pub mod processor;
pub mod storage;
pub mod transaction;
pub mod transport;
