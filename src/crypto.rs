//! One-way hashing for API key storage.
//!
//! Presented keys are hashed with a domain-separated SHA-256 before
//! lookup, so the key store never retains plaintext key material.

use sha2::{Digest, Sha256};

/// Hash a secret (API key) with a versioned domain prefix.
/// Deterministic: the same input always produces the same hash, which
/// is what makes hash-indexed lookup work.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"meshguard-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_secret("mg_abc123"), hash_secret("mg_abc123"));
    }

    #[test]
    fn test_hash_differs_per_input() {
        assert_ne!(hash_secret("mg_abc123"), hash_secret("mg_abc124"));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let h = hash_secret("anything");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
