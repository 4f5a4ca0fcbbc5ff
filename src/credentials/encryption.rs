//! AES-256-GCM codec for token bundles.
//!
//! A bundle is serialized to JSON and sealed under a fresh random nonce on
//! every call. The at-rest form is `hex(nonce(12B) ‖ ciphertext ‖ tag(16B))`.
//! The key is a server-wide secret handed in as 64 hex characters; this module
//! performs no rotation or derivation.

use super::TokenBundle;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use std::fmt;
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Codec failures.
///
/// [`CodecError::AuthenticationFailure`] covers both a wrong key and a
/// tampered ciphertext; callers treat it as "no token", never as fatal.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("ciphertext is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("ciphertext is {0} bytes, shorter than nonce and tag")]
    Truncated(usize),

    #[error("authentication failed (wrong key or tampered ciphertext)")]
    AuthenticationFailure,

    #[error("encryption failed")]
    Encryption,

    #[error("token bundle (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 256-bit AES key. The bytes are never printed.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Parses a 64-character hex string.
    pub fn from_hex(key_hex: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| CodecError::InvalidKey(format!("not valid hex: {}", e)))?;

        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CodecError::InvalidKey(format!(
                "must be {} bytes ({} hex characters), got {} bytes",
                KEY_SIZE,
                KEY_SIZE * 2,
                bytes.len()
            ))
        })?;

        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Seals a bundle. Two calls on the same input yield different output.
pub fn encrypt(bundle: &TokenBundle, key: &EncryptionKey) -> Result<String, CodecError> {
    let plaintext = serde_json::to_vec(bundle)?;

    // Generate random nonce (never reuse!)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let sealed = key
        .cipher()
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|_| CodecError::Encryption)?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + sealed.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&sealed);

    Ok(hex::encode(combined))
}

/// Opens a sealed bundle, verifying the tag before anything is parsed.
pub fn decrypt(ciphertext_hex: &str, key: &EncryptionKey) -> Result<TokenBundle, CodecError> {
    let combined = hex::decode(ciphertext_hex)?;

    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CodecError::Truncated(combined.len()));
    }

    let (nonce, sealed) = combined.split_at(NONCE_SIZE);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CodecError::AuthenticationFailure)?;

    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ProviderExtension;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes([7u8; 32])
    }

    fn test_bundle() -> TokenBundle {
        TokenBundle::new("ya29.access")
            .with_refresh_token("1//refresh")
            .with_expires_at(1_900_000_000)
            .with_extension(ProviderExtension::Gmail {
                user_id: Some("42".to_string()),
                user_email: Some("a@example.com".to_string()),
                user_name: None,
            })
    }

    #[test]
    fn test_key_parsing() {
        assert!(EncryptionKey::from_hex(&"ab".repeat(32)).is_ok());
        assert!(EncryptionKey::from_hex(&"AB".repeat(32)).is_ok());

        // Too short
        assert!(matches!(
            EncryptionKey::from_hex(&"ab".repeat(16)),
            Err(CodecError::InvalidKey(_))
        ));

        // Too long
        assert!(EncryptionKey::from_hex(&"ab".repeat(33)).is_err());

        // Not hex
        assert!(EncryptionKey::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_hex(&"ab".repeat(32)).unwrap();
        let printed = format!("{:?}", key);
        assert!(!printed.contains("ab"));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let bundle = test_bundle();

        let sealed = encrypt(&bundle, &key).expect("Encryption failed");
        assert!(!sealed.contains("ya29"));

        let opened = decrypt(&sealed, &key).expect("Decryption failed");
        assert_eq!(opened, bundle);
    }

    #[test]
    fn test_layout_is_nonce_then_ciphertext_and_tag() {
        let key = test_key();
        let bundle = test_bundle();
        let plaintext_len = serde_json::to_vec(&bundle).unwrap().len();

        let sealed = encrypt(&bundle, &key).unwrap();
        assert_eq!(sealed.len(), 2 * (NONCE_SIZE + plaintext_len + TAG_SIZE));
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let key = test_key();
        let bundle = test_bundle();

        let first = encrypt(&bundle, &key).unwrap();
        let second = encrypt(&bundle, &key).unwrap();

        // Different nonces, different ciphertexts
        assert_ne!(&first[..NONCE_SIZE * 2], &second[..NONCE_SIZE * 2]);
        assert_ne!(first, second);

        assert_eq!(decrypt(&first, &key).unwrap(), bundle);
        assert_eq!(decrypt(&second, &key).unwrap(), bundle);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(&test_bundle(), &test_key()).unwrap();
        let other = EncryptionKey::from_bytes([8u8; 32]);

        assert!(matches!(
            decrypt(&sealed, &other),
            Err(CodecError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_flipped_bit_is_detected() {
        let key = test_key();
        let sealed = encrypt(&test_bundle(), &key).unwrap();
        let mut bytes = hex::decode(&sealed).unwrap();

        // nonce, body and tag regions
        for index in [0, NONCE_SIZE + 3, bytes.len() - 1] {
            bytes[index] ^= 0x01;
            let tampered = hex::encode(&bytes);
            assert!(
                matches!(decrypt(&tampered, &key), Err(CodecError::AuthenticationFailure)),
                "bit flip at byte {} was not detected",
                index
            );
            bytes[index] ^= 0x01;
        }

        assert!(decrypt(&hex::encode(&bytes), &key).is_ok());
    }

    #[test]
    fn test_malformed_ciphertext_fails() {
        let key = test_key();

        assert!(matches!(decrypt("not hex", &key), Err(CodecError::InvalidHex(_))));
        assert!(matches!(decrypt("abcd", &key), Err(CodecError::Truncated(2))));

        let mut sealed = encrypt(&test_bundle(), &key).unwrap();
        sealed.push('0');
        assert!(decrypt(&sealed, &key).is_err());
    }
}
