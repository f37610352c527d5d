//! # Transactions
//!
//! A transaction is addressed to a `(module_id, asset_id)` pair; the
//! `asset` field carries module-specific bytes that the owning module
//! decodes against its own schema during application. The core treats the
//! asset as opaque.
//!
//! Canonical encoding (field numbers in parentheses):
//!
//! ```text
//! Transaction { module_id(1) u32, asset_id(2) u32, nonce(3) u64,
//!               fee(4) u64, sender_public_key(5) bytes, asset(6) bytes,
//!               signatures(7) bytes[] }
//! ```
//!
//! `id = hash(encode(tx))`, content-addressed over the full encoding
//! including signatures. Signing bytes are
//! `network_identifier || encode(tx without signatures)`.

use thiserror::Error;

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::config::{MAX_PAYLOAD_LENGTH, NETWORK_IDENTIFIER_LENGTH};
use crate::crypto::{address_from_public_key, hash, Keypair, PublicKey, Signature};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Static validation failures. These depend only on the transaction
/// bytes, never on chain state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("sender public key must be 32 bytes, got {0}")]
    InvalidSenderPublicKey(usize),

    #[error("transaction carries no signatures")]
    MissingSignatures,

    #[error("signature {index} is not 64 bytes")]
    MalformedSignature { index: usize },

    #[error("sender signature verification failed")]
    InvalidSignature,

    #[error("encoded transaction exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("network identifier must be {expected} bytes, got {got}")]
    InvalidNetworkIdentifier { expected: usize, got: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A signed state-transition request from one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Id of the module that owns the asset schema and apply logic.
    pub module_id: u32,
    /// Id of the asset within the module.
    pub asset_id: u32,
    /// Sender account nonce; must match the on-chain nonce at apply time.
    pub nonce: u64,
    /// Fee in base units, deducted from the sender before application.
    pub fee: u64,
    /// Ed25519 public key of the sender.
    pub sender_public_key: Vec<u8>,
    /// Module-specific payload, decoded by the owning module.
    pub asset: Vec<u8>,
    /// Sender signature(s). Multisignature accounts append one per key.
    pub signatures: Vec<Vec<u8>>,
}

impl Encode for Transaction {
    fn encode(&self, writer: &mut Writer) {
        writer.write_u32(1, self.module_id);
        writer.write_u32(2, self.asset_id);
        writer.write_u64(3, self.nonce);
        writer.write_u64(4, self.fee);
        writer.write_bytes(5, &self.sender_public_key);
        writer.write_bytes(6, &self.asset);
        writer.write_repeated_bytes(7, &self.signatures);
    }
}

impl Decode for Transaction {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            module_id: reader.read_u32(1)?,
            asset_id: reader.read_u32(2)?,
            nonce: reader.read_u64(3)?,
            fee: reader.read_u64(4)?,
            sender_public_key: reader.read_bytes(5)?,
            asset: reader.read_bytes(6)?,
            signatures: reader.read_repeated_bytes(7)?,
        })
    }
}

impl Transaction {
    /// Content id: hash of the full canonical encoding.
    pub fn id(&self) -> Vec<u8> {
        hash(&self.encode_to_bytes()).to_vec()
    }

    /// Address of the sender, derived from the sender public key.
    pub fn sender_address(&self) -> Vec<u8> {
        address_from_public_key(&self.sender_public_key)
    }

    /// The bytes covered by the sender signature:
    /// `network_identifier || encode(tx with signatures stripped)`.
    pub fn signing_bytes(&self, network_identifier: &[u8]) -> Vec<u8> {
        let unsigned = Self {
            signatures: Vec::new(),
            ..self.clone()
        };
        let mut bytes = network_identifier.to_vec();
        bytes.extend_from_slice(&unsigned.encode_to_bytes());
        bytes
    }

    /// Sign with the given keypair, replacing any existing signatures.
    pub fn sign(&mut self, network_identifier: &[u8], keypair: &Keypair) {
        let message = self.signing_bytes(network_identifier);
        self.signatures = vec![keypair.sign(&message).into_bytes()];
    }

    /// Static validity: shape, sizes, and sender signature. Nothing here
    /// reads chain state; nonce and balance checks happen at apply time.
    pub fn validate(&self, network_identifier: &[u8]) -> Result<(), TransactionError> {
        if network_identifier.len() != NETWORK_IDENTIFIER_LENGTH {
            return Err(TransactionError::InvalidNetworkIdentifier {
                expected: NETWORK_IDENTIFIER_LENGTH,
                got: network_identifier.len(),
            });
        }
        if self.sender_public_key.len() != 32 {
            return Err(TransactionError::InvalidSenderPublicKey(
                self.sender_public_key.len(),
            ));
        }
        if self.signatures.is_empty() {
            return Err(TransactionError::MissingSignatures);
        }
        for (index, signature) in self.signatures.iter().enumerate() {
            if signature.len() != 64 {
                return Err(TransactionError::MalformedSignature { index });
            }
        }
        if self.encode_to_bytes().len() > MAX_PAYLOAD_LENGTH {
            return Err(TransactionError::TooLarge {
                max: MAX_PAYLOAD_LENGTH,
            });
        }

        let public_key = PublicKey::from_bytes(&self.sender_public_key)
            .map_err(|_| TransactionError::InvalidSenderPublicKey(self.sender_public_key.len()))?;
        let message = self.signing_bytes(network_identifier);
        let signature = Signature::from_bytes(self.signatures[0].clone());
        if !public_key.verify(&message, &signature) {
            return Err(TransactionError::InvalidSignature);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn network_id() -> Vec<u8> {
        vec![0xAB; NETWORK_IDENTIFIER_LENGTH]
    }

    fn signed_tx(keypair: &Keypair) -> Transaction {
        let mut tx = Transaction {
            module_id: 2,
            asset_id: 0,
            nonce: 1,
            fee: 1_000_000,
            sender_public_key: keypair.public_key().as_bytes().to_vec(),
            asset: vec![1, 2, 3],
            signatures: vec![],
        };
        tx.sign(&network_id(), keypair);
        tx
    }

    #[test]
    fn encode_decode_roundtrip() {
        let keypair = Keypair::generate();
        let tx = signed_tx(&keypair);
        let bytes = tx.encode_to_bytes();
        let decoded = Transaction::decode_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.encode_to_bytes(), bytes);
    }

    #[test]
    fn id_is_content_addressed() {
        let keypair = Keypair::generate();
        let tx = signed_tx(&keypair);
        let mut other = tx.clone();
        assert_eq!(tx.id(), other.id());

        other.fee += 1;
        assert_ne!(tx.id(), other.id());
    }

    #[test]
    fn id_covers_signatures() {
        let keypair = Keypair::generate();
        let tx = signed_tx(&keypair);
        let mut stripped = tx.clone();
        stripped.signatures.clear();
        assert_ne!(tx.id(), stripped.id());
    }

    #[test]
    fn validate_accepts_properly_signed() {
        let keypair = Keypair::generate();
        let tx = signed_tx(&keypair);
        assert_eq!(tx.validate(&network_id()), Ok(()));
    }

    #[test]
    fn validate_rejects_wrong_network() {
        let keypair = Keypair::generate();
        let tx = signed_tx(&keypair);
        let other_network = vec![0xCD; NETWORK_IDENTIFIER_LENGTH];
        assert_eq!(
            tx.validate(&other_network),
            Err(TransactionError::InvalidSignature)
        );
    }

    #[test]
    fn validate_rejects_tampered_asset() {
        let keypair = Keypair::generate();
        let mut tx = signed_tx(&keypair);
        tx.asset = vec![9, 9, 9];
        assert_eq!(
            tx.validate(&network_id()),
            Err(TransactionError::InvalidSignature)
        );
    }

    #[test]
    fn validate_rejects_missing_signatures() {
        let keypair = Keypair::generate();
        let mut tx = signed_tx(&keypair);
        tx.signatures.clear();
        assert_eq!(
            tx.validate(&network_id()),
            Err(TransactionError::MissingSignatures)
        );
    }

    #[test]
    fn validate_rejects_short_public_key() {
        let keypair = Keypair::generate();
        let mut tx = signed_tx(&keypair);
        tx.sender_public_key.truncate(16);
        assert_eq!(
            tx.validate(&network_id()),
            Err(TransactionError::InvalidSenderPublicKey(16))
        );
    }

    #[test]
    fn validate_rejects_malformed_signature() {
        let keypair = Keypair::generate();
        let mut tx = signed_tx(&keypair);
        tx.signatures[0].truncate(10);
        assert_eq!(
            tx.validate(&network_id()),
            Err(TransactionError::MalformedSignature { index: 0 })
        );
    }

    #[test]
    fn sender_address_matches_keypair() {
        let keypair = Keypair::generate();
        let tx = signed_tx(&keypair);
        assert_eq!(tx.sender_address(), keypair.address());
    }
}
