//! # Active Validator Set
//!
//! The ordered list of delegates eligible to forge, persisted in the
//! chain-state domain so that the DPoS module can rotate it at round
//! boundaries and header verification can read it back. Slot assignment
//! is round-robin: the validator at index `slot % len` owns the slot.

use crate::codec::{CodecError, Decode, Encode, Reader, Writer};

/// Chain-state key holding the encoded active validator list.
pub const VALIDATORS_STATE_KEY: &[u8] = b"chain:validators";

/// One eligible delegate. The public key is carried alongside the address
/// so header signatures can be verified without an account lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub address: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl Encode for Validator {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(1, &self.address);
        writer.write_bytes(2, &self.public_key);
    }
}

impl Decode for Validator {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: reader.read_bytes(1)?,
            public_key: reader.read_bytes(2)?,
        })
    }
}

/// The active set, in forging order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorList {
    pub validators: Vec<Validator>,
}

impl ValidatorList {
    /// The validator owning a given slot, round-robin over the set.
    /// `None` for an empty set.
    pub fn for_slot(&self, slot: u64) -> Option<&Validator> {
        if self.validators.is_empty() {
            return None;
        }
        let index = (slot % self.validators.len() as u64) as usize;
        self.validators.get(index)
    }

    /// Find a validator by address.
    pub fn by_address(&self, address: &[u8]) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == address)
    }

    /// Number of validators in the set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// True when no validators are registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Encode for ValidatorList {
    fn encode(&self, writer: &mut Writer) {
        writer.write_repeated_objects(1, &self.validators);
    }
}

impl Decode for ValidatorList {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            validators: reader.read_repeated_objects(1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(n: u8) -> ValidatorList {
        ValidatorList {
            validators: (0..n)
                .map(|i| Validator {
                    address: vec![i; 20],
                    public_key: vec![i; 32],
                })
                .collect(),
        }
    }

    #[test]
    fn slot_assignment_is_round_robin() {
        let validators = list(3);
        assert_eq!(validators.for_slot(0).unwrap().address, vec![0; 20]);
        assert_eq!(validators.for_slot(1).unwrap().address, vec![1; 20]);
        assert_eq!(validators.for_slot(2).unwrap().address, vec![2; 20]);
        assert_eq!(validators.for_slot(3).unwrap().address, vec![0; 20]);
    }

    #[test]
    fn empty_set_owns_no_slots() {
        assert!(list(0).for_slot(5).is_none());
    }

    #[test]
    fn lookup_by_address() {
        let validators = list(4);
        assert!(validators.by_address(&[2u8; 20]).is_some());
        assert!(validators.by_address(&[9u8; 20]).is_none());
    }

    #[test]
    fn codec_roundtrip() {
        let validators = list(5);
        let bytes = validators.encode_to_bytes();
        assert_eq!(ValidatorList::decode_from_bytes(&bytes).unwrap(), validators);
    }
}
