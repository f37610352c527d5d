//! # Key Management
//!
//! Ed25519 keypair generation, signing, and verification. Every block and
//! transaction signature in Meridian is Ed25519: deterministic signatures,
//! 32-byte keys, 64-byte signatures, fast batch-friendly verification.
//!
//! Private key material never implements `Serialize`; exporting a signing
//! key is a deliberate call to `to_bytes()`, not a serde accident.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::hash::hash;
use crate::config::ADDRESS_LENGTH;

/// Errors that can occur during key operations.
///
/// Deliberately vague about the exact failure mode; error messages must
/// not leak information about key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// An Ed25519 signing keypair.
///
/// Used by block generators to sign headers and by tests to build signed
/// fixtures. The node core itself only ever *verifies*; signing keys stay
/// with the generation tooling.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from 32 secret key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret: [u8; SECRET_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The address derived from this keypair's public key.
    pub fn address(&self) -> Vec<u8> {
        address_from_public_key(&self.public_key().bytes)
    }

    /// Sign a message, returning the 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// The public half of an identity, safe to put on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    /// Construct from raw bytes. Point validity is checked lazily at
    /// verification time.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify a signature over a message.
    ///
    /// Returns `false` for malformed keys or signatures. Never panics.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let sig_bytes: [u8; 64] = match signature.bytes.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.bytes[..8]))
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// An Ed25519 signature over a message.
///
/// Stored as `Vec<u8>` for codec compatibility, but always exactly 64
/// bytes when produced by `Keypair::sign`. Verification of any other
/// length simply returns `false`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Signature {
    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the raw byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.bytes[..self.bytes.len().min(8)];
        write!(f, "Signature({})", hex::encode(head))
    }
}

// ---------------------------------------------------------------------------
// Address derivation
// ---------------------------------------------------------------------------

/// Derive an account address from an Ed25519 public key.
///
/// The address is the first [`ADDRESS_LENGTH`] bytes of the BLAKE3 hash of
/// the key. Address uniqueness is the sole account invariant; collisions
/// at 160 bits are not a practical concern.
pub fn address_from_public_key(public_key: &[u8]) -> Vec<u8> {
    hash(public_key)[..ADDRESS_LENGTH].to_vec()
}
