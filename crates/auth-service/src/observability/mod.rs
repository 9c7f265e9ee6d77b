//! Observability for the auth service.
//!
//! # Privacy by Default
//!
//! Async entry points use `#[instrument(skip_all)]` and add fields
//! explicitly. Fields fall into three groups:
//! - **SAFE**: logged in plaintext (stage names, outcomes, token source)
//! - **HASHED**: correlation prefix only (token hashes, subjects)
//! - **NEVER**: raw tokens, API keys, client assertions, private keys

pub mod metrics;

use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars).
///
/// Lets log lines about the same token or subject be grouped without the
/// value itself appearing in logs. This is not a secret-protecting hash;
/// token storage uses [`crate::auth::token_hash`].
pub fn hash_for_correlation(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    hex::encode(result.get(..4).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_for_correlation_is_short_and_stable() {
        let a = hash_for_correlation("user-123");
        assert_eq!(a.len(), 8);
        assert_eq!(a, hash_for_correlation("user-123"));
        assert_ne!(a, hash_for_correlation("user-124"));
        assert!(!a.contains("user"));
    }
}
