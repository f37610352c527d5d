//! # Hashing Utilities
//!
//! BLAKE3 is the only hash function in Meridian. Block ids, transaction
//! ids, address derivation, and the state-root chain all use it. One
//! function, one output size, no negotiation.

/// Compute the BLAKE3 hash of the input data.
///
/// Returns the 32-byte digest as a fixed-size array. This is the content
/// id function for every hashed entity in the protocol: equal encoding
/// implies equal id.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash the concatenation of two byte strings.
///
/// Used for chained commitments (state roots) where the parent digest is
/// folded together with new material: `hash(parent || data)`.
pub fn hash_chain(parent: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(parent);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}
