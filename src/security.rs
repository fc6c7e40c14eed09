//! Token generation and digest verification.
//!
//! Every protocol-significant identifier (flow state, temporary token,
//! first-party access/refresh tokens) is 32 bytes of CSPRNG output encoded
//! base64url. Secrets are never stored raw: the store holds
//! SHA-256(pepper || salt || secret), with a fresh salt per secret and a
//! server-wide pepper that lives only in configuration.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Default token width. 256 bits; the protocol floor is 128.
pub const TOKEN_BYTES: usize = 32;
/// Minimum acceptable token width.
pub const MIN_TOKEN_BYTES: usize = 16;
const SALT_BYTES: usize = 16;

/// Cryptographically secure random token at the default width, base64url
/// without padding.
pub fn generate_token() -> String {
    generate_token_with_len(TOKEN_BYTES)
}

/// Random token with an explicit width. Widths below 128 bits are a
/// caller bug, not a runtime condition.
pub fn generate_token_with_len(byte_length: usize) -> String {
    assert!(
        byte_length >= MIN_TOKEN_BYTES,
        "token width below {MIN_TOKEN_BYTES} bytes"
    );
    let mut bytes = vec![0u8; byte_length];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Per-secret salt. Never reused across secrets.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Carries the pepper so managers receive it by construction instead of
/// reading ambient configuration.
#[derive(Clone)]
pub struct Digester {
    pepper: String,
}

impl Digester {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    /// One-way digest of `secret` under `salt` and the server pepper.
    pub fn digest(&self, secret: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(salt.as_bytes());
        hasher.update(secret.as_bytes());
        Base64UrlUnpadded::encode_string(&hasher.finalize())
    }

    /// Recompute and compare in constant time. Returns false, never an
    /// error, on malformed stored digests.
    pub fn verify(&self, stored_digest: &str, salt: &str, candidate: &str) -> bool {
        let stored = match Base64UrlUnpadded::decode_vec(stored_digest) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(salt.as_bytes());
        hasher.update(candidate.as_bytes());
        constant_time_eq(&stored, &hasher.finalize())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_length_and_entropy_encoding() {
        let token = generate_token();
        let decoded = Base64UrlUnpadded::decode_vec(&token).expect("token is base64url");
        assert_eq!(decoded.len(), TOKEN_BYTES);
        // 256 bits, comfortably above the 128-bit protocol floor
        assert!(decoded.len() * 8 >= 128);
    }

    #[test]
    fn test_token_width_is_respected() {
        let token = generate_token_with_len(24);
        let decoded = Base64UrlUnpadded::decode_vec(&token).unwrap();
        assert_eq!(decoded.len(), 24);
    }

    #[test]
    #[should_panic(expected = "token width")]
    fn test_token_width_floor_is_enforced() {
        generate_token_with_len(8);
    }

    #[test]
    fn test_tokens_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_token()));
        }
    }

    #[test]
    fn test_salts_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_salt()));
        }
    }

    #[test]
    fn test_digest_round_trip() {
        let digester = Digester::new("pepper");
        let secret = generate_token();
        let salt = generate_salt();
        let digest = digester.digest(&secret, &salt);
        assert!(digester.verify(&digest, &salt, &secret));
    }

    #[test]
    fn test_digest_rejects_wrong_secret() {
        let digester = Digester::new("pepper");
        let salt = generate_salt();
        let digest = digester.digest("secret-a", &salt);
        assert!(!digester.verify(&digest, &salt, "secret-b"));
    }

    #[test]
    fn test_digest_rejects_bit_flip() {
        let digester = Digester::new("pepper");
        let secret = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
        let salt = generate_salt();
        let digest = digester.digest(secret, &salt);
        // Flip one character; verification must fail for every variant
        let flipped = format!("B{}", &secret[1..]);
        assert!(!digester.verify(&digest, &salt, &flipped));
    }

    #[test]
    fn test_digest_depends_on_salt_and_pepper() {
        let digester = Digester::new("pepper");
        let other_pepper = Digester::new("other-pepper");
        let secret = generate_token();
        let salt_a = generate_salt();
        let salt_b = generate_salt();

        assert_ne!(
            digester.digest(&secret, &salt_a),
            digester.digest(&secret, &salt_b)
        );
        assert_ne!(
            digester.digest(&secret, &salt_a),
            other_pepper.digest(&secret, &salt_a)
        );
    }

    #[test]
    fn test_verify_malformed_digest_returns_false() {
        let digester = Digester::new("pepper");
        assert!(!digester.verify("not base64!!", "salt", "secret"));
        assert!(!digester.verify("", "salt", "secret"));
    }
}
