//! One-way token hashes used as storage keys.
//!
//! The two hashes are deliberately distinct so a row from one table can never
//! be used to probe the other.

use sha2::{Digest, Sha256, Sha512};

/// Key for the introspection cache: hex(SHA-512(raw token)).
pub fn introspection_cache_key(token: &str) -> String {
    hex::encode(Sha512::digest(token.as_bytes()))
}

/// Lookup key for local API tokens: hex(SHA-256(raw token)).
pub fn api_token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_sha512_hex() {
        let key = introspection_cache_key("abc");
        assert_eq!(key.len(), 128);
        assert!(key.starts_with("ddaf35a193617aba"));
    }

    #[test]
    fn test_api_token_hash_is_sha256_hex() {
        assert_eq!(
            api_token_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hashes_differ() {
        assert_ne!(
            introspection_cache_key("gk_token"),
            api_token_hash("gk_token")
        );
    }
}
