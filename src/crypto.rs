//! Hashing and signing primitives.
//!
//! Pure functions shared by the archiver, the integrity sweep, and the
//! signature ledger: SHA-256 content digests in hex and base64, and Ed25519
//! key generation, signing, and verification via `ring`.

use crate::error::{CustodiaError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use sha2::{Digest, Sha256};
use std::path::Path;

/// SHA-256 digest of `data`, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 digest of `data`, base64 encoded.
pub fn sha256_base64(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    BASE64.encode(hasher.finalize())
}

/// SHA-256 digest of a file's bytes, hex encoded.
pub async fn file_digest_hex(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(sha256_hex(&bytes))
}

/// A freshly generated Ed25519 keypair, both halves base64 encoded.
pub struct GeneratedKeypair {
    /// PKCS#8 v2 document holding the private key.
    pub signing_key: String,
    /// Raw 32-byte public key.
    pub public_key: String,
}

/// Generate an Ed25519 keypair.
pub fn generate_keypair() -> Result<GeneratedKeypair> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|_| CustodiaError::Crypto("Failed to generate signing key".to_string()))?;
    let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|_| CustodiaError::Crypto("Generated key is unusable".to_string()))?;

    Ok(GeneratedKeypair {
        signing_key: BASE64.encode(pkcs8.as_ref()),
        public_key: BASE64.encode(keypair.public_key().as_ref()),
    })
}

/// Sign `message` with a base64 PKCS#8 Ed25519 key; returns the base64 signature.
pub fn sign_message(signing_key_b64: &str, message: &[u8]) -> Result<String> {
    let pkcs8 = BASE64
        .decode(signing_key_b64)
        .map_err(|_| CustodiaError::Crypto("Signing key is not valid base64".to_string()))?;
    let keypair = Ed25519KeyPair::from_pkcs8(&pkcs8)
        .map_err(|_| CustodiaError::Crypto("Signing key is not a valid Ed25519 key".to_string()))?;

    Ok(BASE64.encode(keypair.sign(message).as_ref()))
}

/// Verify a base64 Ed25519 signature over `message` against a base64 public key.
///
/// Malformed key or signature material counts as verification failure, not an
/// error; "invalid" is an expected outcome here.
pub fn verify_message(public_key_b64: &str, message: &[u8], signature_b64: &str) -> bool {
    let (Ok(public_key), Ok(signature)) =
        (BASE64.decode(public_key_b64), BASE64.decode(signature_b64))
    else {
        return false;
    };

    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(message, &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_stable() {
        let a = sha256_hex(b"wound assessment #123");
        let b = sha256_hex(b"wound assessment #123");
        let c = sha256_hex(b"wound assessment #124");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_sha256_base64_differs_from_hex() {
        let data = b"some clinical document";
        assert_ne!(sha256_hex(data), sha256_base64(data));
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = generate_keypair().unwrap();
        let message = b"document digest";

        let signature = sign_message(&keys.signing_key, message).unwrap();
        assert!(verify_message(&keys.public_key, message, &signature));
        assert!(!verify_message(&keys.public_key, b"other digest", &signature));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let keys = generate_keypair().unwrap();
        let other = generate_keypair().unwrap();
        let signature = sign_message(&keys.signing_key, b"msg").unwrap();

        assert!(!verify_message(&other.public_key, b"msg", &signature));
    }

    #[test]
    fn test_verify_tolerates_garbage_material() {
        assert!(!verify_message("not base64!!", b"msg", "also not base64!!"));
    }

    #[tokio::test]
    async fn test_file_digest_matches_in_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        tokio::fs::write(&path, b"archive bytes").await.unwrap();

        let digest = file_digest_hex(&path).await.unwrap();
        assert_eq!(digest, sha256_hex(b"archive bytes"));
    }
}
