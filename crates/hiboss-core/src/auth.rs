//! Token hashing shared by boss verification and agent token issuance.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a bearer token, stored instead of the
/// token itself so the database never holds a usable credential at rest.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex() {
        let a = hash_token("swordfish");
        let b = hash_token("swordfish");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_tokens_hash_differently() {
        assert_ne!(hash_token("a"), hash_token("b"));
    }
}
