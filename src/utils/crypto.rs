// Cryptographic utilities for generating secure tokens and protecting cookie payloads

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Entropy of generated session identifiers
pub const SESSION_ID_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Generate a cryptographically secure OAuth `state` value
///
/// 24 bytes (192 bits) of entropy, base64url encoded to 32 characters.
#[must_use]
pub fn generate_state_token() -> String {
    generate_nonce(24)
}

/// Generate a fresh session identifier
#[must_use]
pub fn generate_session_id() -> String {
    generate_nonce(SESSION_ID_BYTES)
}

/// Generate a cryptographically secure nonce of specified byte length
///
/// # Returns
///
/// A base64url-encoded string representing the specified bytes of random data
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Encrypt raw bytes with AES-256-GCM
///
/// # Returns
///
/// The nonce followed by the ciphertext
///
/// # Errors
///
/// Returns an error if:
/// - Key length is invalid
/// - AES encryption fails
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {ENCRYPTION_KEY_SIZE} bytes, got {}",
            key.len()
        ));
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt bytes produced by [`encrypt_bytes`]
///
/// # Errors
///
/// Returns an error if:
/// - Key length is invalid
/// - Data is shorter than a nonce
/// - AES decryption fails
pub fn decrypt_bytes(combined: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {ENCRYPTION_KEY_SIZE} bytes, got {}",
            key.len()
        ));
    }
    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {e}"))
}

/// Derive a 32-byte encryption key from key material of any length
#[must_use]
pub fn derive_encryption_key(input_key: &[u8]) -> [u8; ENCRYPTION_KEY_SIZE] {
    let digest = Sha256::digest(input_key);
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}

/// Compute an HMAC-SHA256 tag over `message`
///
/// # Errors
///
/// Returns an error if the key is rejected by the MAC
pub fn hmac_sign(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| anyhow!("Invalid HMAC key: {e}"))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify an HMAC-SHA256 tag in constant time
#[must_use]
pub fn hmac_verify(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_entropy() {
        let id = generate_session_id();
        // 32 bytes base64url without padding
        assert_eq!(id.len(), 43);
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn test_state_token_uniqueness() {
        let tokens: std::collections::HashSet<_> = (0..100).map(|_| generate_state_token()).collect();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = derive_encryption_key(b"block-key");
        let sealed = encrypt_bytes(b"session-id", &key).unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"session-id");
        assert_eq!(decrypt_bytes(&sealed, &key).unwrap(), b"session-id");

        let other = derive_encryption_key(b"other-key");
        assert!(decrypt_bytes(&sealed, &other).is_err());
        assert!(decrypt_bytes(&sealed[..4], &key).is_err());
    }

    #[test]
    fn test_hmac_verify() {
        let tag = hmac_sign(b"key", b"message").unwrap();
        assert!(hmac_verify(b"key", b"message", &tag));
        assert!(!hmac_verify(b"key", b"messagf", &tag));
        assert!(!hmac_verify(b"other", b"message", &tag));
    }
}
