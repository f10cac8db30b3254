//! PKCE (Proof Key for Code Exchange) generation
//!
//! Verifiers are drawn from the RFC 7636 unreserved alphabet using the OS
//! random source; challenges use the S256 method.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Unreserved URL-safe characters allowed in a code verifier
pub const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Shortest verifier RFC 7636 allows
pub const MIN_VERIFIER_LENGTH: usize = 43;

/// Longest verifier RFC 7636 allows
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Challenge method sent with the authorization request
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Largest multiple of the alphabet size that fits in a byte.
/// Bytes at or above this are rejected so every character is equally likely.
const ACCEPT_BELOW: u8 = (256 - 256 % VERIFIER_ALPHABET.len()) as u8;

#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Verifier length {0} outside 43..=128")]
    InvalidLength(usize),
}

/// Generate a code verifier of `length` characters
pub fn generate_verifier(length: usize) -> Result<String, PkceError> {
    if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&length) {
        return Err(PkceError::InvalidLength(length));
    }

    let mut verifier = String::with_capacity(length);
    let mut buf = [0u8; 64];

    while verifier.len() < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| PkceError::EntropyUnavailable(e.to_string()))?;

        for &byte in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if verifier.len() == length {
                break;
            }
            let idx = byte as usize % VERIFIER_ALPHABET.len();
            verifier.push(VERIFIER_ALPHABET[idx] as char);
        }
    }

    Ok(verifier)
}

/// Derive the S256 challenge: base64url(sha256(verifier)) without padding
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// A verifier together with its derived challenge
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair with a verifier of `length` characters
    pub fn generate(length: usize) -> Result<Self, PkceError> {
        let verifier = generate_verifier(length)?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let challenge = derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let verifier = generate_verifier(64).unwrap();
        assert_eq!(derive_challenge(&verifier), derive_challenge(&verifier));
    }

    #[test]
    fn test_challenge_has_no_padding_or_std_chars() {
        let pair = PkcePair::generate(128).unwrap();
        assert!(!pair.challenge.contains('+'));
        assert!(!pair.challenge.contains('/'));
        assert!(!pair.challenge.contains('='));
        // 32-byte digest, unpadded base64
        assert_eq!(pair.challenge.len(), 43);
    }

    #[test]
    fn test_rejects_out_of_range_lengths() {
        assert!(matches!(generate_verifier(42), Err(PkceError::InvalidLength(42))));
        assert!(matches!(generate_verifier(129), Err(PkceError::InvalidLength(129))));
    }

    #[test]
    fn test_pairs_differ() {
        let a = PkcePair::generate(128).unwrap();
        let b = PkcePair::generate(128).unwrap();
        assert_ne!(a.verifier, b.verifier);
    }

    proptest! {
        #[test]
        fn prop_verifier_length_and_alphabet(len in MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH) {
            let verifier = generate_verifier(len).unwrap();
            prop_assert_eq!(verifier.len(), len);
            prop_assert!(verifier.bytes().all(|b| VERIFIER_ALPHABET.contains(&b)));
        }

        #[test]
        fn prop_challenge_url_safe(verifier in "[A-Za-z0-9._~-]{43,128}") {
            let challenge = derive_challenge(&verifier);
            prop_assert!(!challenge.contains('+'));
            prop_assert!(!challenge.contains('/'));
            prop_assert!(!challenge.contains('='));
        }
    }
}
