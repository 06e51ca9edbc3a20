// src/utils/crypto.rs
//! Cryptographic utilities optimized for blockchain compatibility.
//!
//! Uses Keccak-256 (Ethereum's standard hash function) for hashing and
//! address derivation.

use ethers::utils::keccak256;
use ethers_core::utils::to_checksum;
use ethers_core::types::Address;

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Derives the Ethereum address of an uncompressed secp256k1 public key.
///
/// # Arguments
/// * `uncompressed` - 65-byte SEC1 point (`0x04 || X || Y`)
///
/// # Returns
/// `None` when the input is not an uncompressed point.
pub fn eth_address(uncompressed: &[u8]) -> Option<Address> {
    if uncompressed.len() != 65 || uncompressed[0] != 0x04 {
        return None;
    }
    let hash = hash_data(&uncompressed[1..]);
    Some(Address::from_slice(&hash[12..]))
}

/// Formats an address with the EIP-55 mixed-case checksum.
pub fn checksum_address(address: &Address) -> String {
    to_checksum(address, None)
}

/// Hashes a message the way `personal_sign` does (EIP-191, version `0x45`).
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    hash_data(&prefixed)
}
