// Hashing utilities

use crate::core::{Hash256, PubKeyHash};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Single SHA256 hash
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut result = [0u8; 32];
    result.copy_from_slice(&digest);
    Hash256::new(result)
}

/// SHA256 double hash, used for address checksums
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    Hash256::new(result)
}

/// RIPEMD160(SHA256(data)) - used for address generation
pub fn hash160(data: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA256("abc")
        let hash = sha256(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash256_differs_from_single() {
        let data = b"hello world";
        assert_ne!(sha256(data), hash256(data));
        assert_eq!(hash256(data), hash256(data));
    }

    #[test]
    fn test_hash160() {
        let hash = hash160(b"test data");
        assert_eq!(hash.len(), 20);
        assert_eq!(hash, hash160(b"test data"));
    }
}
