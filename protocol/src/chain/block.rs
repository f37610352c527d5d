//! # Block Structure
//!
//! A block is a header plus an ordered transaction payload. The header
//! links to its parent by content id, commits to the payload through the
//! transaction root, and commits to the post-application state through
//! the state root.
//!
//! Canonical encoding (field numbers in parentheses):
//!
//! ```text
//! BlockHeader { version(1) u32, timestamp(2) u32, height(3) u32,
//!               previous_block_id(4) bytes, transaction_root(5) bytes,
//!               generator_address(6) bytes, state_root(7) bytes,
//!               assets(8) bytes[], signature(9) bytes }
//! Block       { header(1) bytes, payload(2) bytes[] }
//! ```
//!
//! ## Id Derivation
//!
//! `id = hash(encode(header))` over the full header encoding, signature
//! included. Content-addressed: equal encoding implies equal id. Signing
//! bytes are `network_identifier || encode(header without signature)`,
//! so the signature covers everything but itself.

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};
use crate::crypto::{hash, Keypair};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Block metadata and chain linkage. Everything except the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header format version.
    pub version: u32,
    /// Unix timestamp in seconds. Determines the forging slot.
    pub timestamp: u32,
    /// Chain height; genesis is height 0.
    pub height: u32,
    /// Content id of the parent block. Empty for genesis.
    pub previous_block_id: Vec<u8>,
    /// Commitment to the payload transaction ids, in payload order.
    pub transaction_root: Vec<u8>,
    /// Address of the delegate that forged this block.
    pub generator_address: Vec<u8>,
    /// Commitment to the account/chain-state space after this block.
    pub state_root: Vec<u8>,
    /// Opaque per-module header extensions. Genesis carries its seed
    /// asset in slot 0.
    pub assets: Vec<Vec<u8>>,
    /// Generator's Ed25519 signature. Empty for genesis.
    pub signature: Vec<u8>,
}

impl BlockHeader {
    /// Content id of this header.
    pub fn id(&self) -> Vec<u8> {
        hash(&self.encode_to_bytes()).to_vec()
    }

    /// Bytes covered by the generator signature.
    pub fn signing_bytes(&self, network_identifier: &[u8]) -> Vec<u8> {
        let unsigned = Self {
            signature: Vec::new(),
            ..self.clone()
        };
        let mut bytes = network_identifier.to_vec();
        bytes.extend_from_slice(&unsigned.encode_to_bytes());
        bytes
    }

    /// Sign with the generator keypair, replacing any existing signature.
    pub fn sign(&mut self, network_identifier: &[u8], keypair: &Keypair) {
        let message = self.signing_bytes(network_identifier);
        self.signature = keypair.sign(&message).into_bytes();
    }
}

impl Encode for BlockHeader {
    fn encode(&self, writer: &mut Writer) {
        writer.write_u32(1, self.version);
        writer.write_u32(2, self.timestamp);
        writer.write_u32(3, self.height);
        writer.write_bytes(4, &self.previous_block_id);
        writer.write_bytes(5, &self.transaction_root);
        writer.write_bytes(6, &self.generator_address);
        writer.write_bytes(7, &self.state_root);
        writer.write_repeated_bytes(8, &self.assets);
        writer.write_bytes(9, &self.signature);
    }
}

impl Decode for BlockHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: reader.read_u32(1)?,
            timestamp: reader.read_u32(2)?,
            height: reader.read_u32(3)?,
            previous_block_id: reader.read_bytes(4)?,
            transaction_root: reader.read_bytes(5)?,
            generator_address: reader.read_bytes(6)?,
            state_root: reader.read_bytes(7)?,
            assets: reader.read_repeated_bytes(8)?,
            signature: reader.read_bytes(9)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header plus ordered transaction payload. Empty payloads
/// are valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Vec<Transaction>,
}

impl Block {
    /// Content id of this block (the header id).
    pub fn id(&self) -> Vec<u8> {
        self.header.id()
    }

    /// Height shorthand.
    pub fn height(&self) -> u32 {
        self.header.height
    }
}

impl Encode for Block {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.header.encode_to_bytes());
        let encoded: Vec<Vec<u8>> = self.payload.iter().map(|tx| tx.encode_to_bytes()).collect();
        writer.write_repeated_bytes(2, &encoded);
    }
}

impl Decode for Block {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let header_bytes = reader.read_bytes(1)?;
        let header = BlockHeader::decode_from_bytes(&header_bytes)?;
        let payload = reader
            .read_repeated_bytes(2)?
            .iter()
            .map(|bytes| Transaction::decode_from_bytes(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { header, payload })
    }
}

/// Commitment to a payload: hash over the concatenated transaction ids in
/// payload order. An empty payload commits to the hash of the empty
/// string.
pub fn compute_transaction_root(payload: &[Transaction]) -> Vec<u8> {
    let mut material = Vec::with_capacity(payload.len() * 32);
    for tx in payload {
        material.extend_from_slice(&tx.id());
    }
    hash(&material).to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NETWORK_IDENTIFIER_LENGTH;

    fn network_id() -> Vec<u8> {
        vec![0xAB; NETWORK_IDENTIFIER_LENGTH]
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 2,
            timestamp: 1_700_000_000,
            height: 12,
            previous_block_id: vec![0x11; 32],
            transaction_root: compute_transaction_root(&[]),
            generator_address: vec![0x22; 20],
            state_root: vec![0x33; 32],
            assets: vec![],
            signature: vec![],
        }
    }

    #[test]
    fn header_roundtrip() {
        let mut header = sample_header();
        header.sign(&network_id(), &Keypair::generate());
        let bytes = header.encode_to_bytes();
        let decoded = BlockHeader::decode_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.encode_to_bytes(), bytes);
    }

    #[test]
    fn equal_encoding_implies_equal_id() {
        let header = sample_header();
        let copy = header.clone();
        assert_eq!(header.id(), copy.id());
        assert_eq!(header.id().len(), 32);
    }

    #[test]
    fn id_changes_with_any_field() {
        let header = sample_header();
        let mut changed = header.clone();
        changed.timestamp += 1;
        assert_ne!(header.id(), changed.id());
    }

    #[test]
    fn signature_covers_header_but_not_itself() {
        let keypair = Keypair::generate();
        let mut header = sample_header();
        header.sign(&network_id(), &keypair);

        // Signing bytes of a signed and unsigned header are identical.
        let mut unsigned = header.clone();
        unsigned.signature = vec![];
        assert_eq!(
            header.signing_bytes(&network_id()),
            unsigned.signing_bytes(&network_id())
        );

        // The id, however, covers the signature.
        assert_ne!(header.id(), unsigned.id());
    }

    #[test]
    fn block_roundtrip_with_payload() {
        let keypair = Keypair::generate();
        let mut tx = Transaction {
            module_id: 2,
            asset_id: 0,
            nonce: 0,
            fee: 100,
            sender_public_key: keypair.public_key().as_bytes().to_vec(),
            asset: vec![1, 2],
            signatures: vec![],
        };
        tx.sign(&network_id(), &keypair);

        let block = Block {
            header: sample_header(),
            payload: vec![tx],
        };
        let bytes = block.encode_to_bytes();
        let decoded = Block::decode_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.encode_to_bytes(), bytes);
    }

    #[test]
    fn empty_payload_is_valid() {
        let block = Block {
            header: sample_header(),
            payload: vec![],
        };
        let decoded = Block::decode_from_bytes(&block.encode_to_bytes()).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn transaction_root_depends_on_order() {
        let keypair = Keypair::generate();
        let make = |nonce| {
            let mut tx = Transaction {
                module_id: 2,
                asset_id: 0,
                nonce,
                fee: 1,
                sender_public_key: keypair.public_key().as_bytes().to_vec(),
                asset: vec![],
                signatures: vec![],
            };
            tx.sign(&network_id(), &keypair);
            tx
        };
        let a = make(1);
        let b = make(2);

        let forward = compute_transaction_root(&[a.clone(), b.clone()]);
        let backward = compute_transaction_root(&[b, a]);
        assert_ne!(forward, backward);
    }
}
