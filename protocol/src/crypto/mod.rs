//! # Cryptographic Primitives
//!
//! Thin, documented wrappers around the hash and signature crates the rest
//! of the protocol builds on. Everything here is a pure function or a small
//! value type; no key storage, no passphrase handling, no mnemonic tooling.
//!
//! - **hash** — BLAKE3 content hashing for block ids, transaction ids, and
//!   the state-root chain.
//! - **keys** — Ed25519 keypairs, signing, and verification.

pub mod hash;
pub mod keys;

pub use hash::{hash, hash_chain};
pub use keys::{address_from_public_key, Keypair, PublicKey, Signature};
