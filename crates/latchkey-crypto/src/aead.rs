//! Data key wrapping using AES-256-GCM
//!
//! All functions are pure - the IV must be provided by the caller. This keeps
//! wrapping deterministic under test and leaves randomness to the
//! environment.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::Zeroizing;

use crate::{derived_key::DerivedKey, error::CryptoError};

/// AES-GCM IV size (12 bytes)
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag size (16 bytes)
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// Encrypt `plaintext` under `key`, binding `aad`.
///
/// Returns `ciphertext || tag`; the ciphertext is as long as the plaintext.
///
/// # Security
///
/// - Caller MUST never reuse an IV with the same key. Each derived key is
///   fresh per wrap, and callers MUST still draw IVs from a CSPRNG
pub fn seal(
    key: &DerivedKey,
    iv: &[u8; AES_GCM_IV_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher.encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad }).map_err(|_| {
        CryptoError::EncryptionFailed { reason: "plaintext exceeds AES-GCM limits".to_string() }
    })
}

/// Decrypt `ciphertext || tag` under `key`, verifying `aad`.
///
/// # Errors
///
/// - `CiphertextTooShort`: input cannot hold a tag
/// - `DecryptionFailed`: authentication tag, key or AAD is incorrect
pub fn open(
    key: &DerivedKey,
    iv: &[u8; AES_GCM_IV_LENGTH],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext_and_tag.len() < AES_GCM_TAG_LENGTH {
        return Err(CryptoError::CiphertextTooShort { len: ciphertext_and_tag.len() });
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext_and_tag, aad })
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::kdf_counter_mode;

    fn test_key(seed: u8) -> DerivedKey {
        kdf_counter_mode(&[seed; 32], b"test", &[0u8; 16]).unwrap()
    }

    #[test]
    fn seal_then_open() {
        let key = test_key(1);
        let iv = [7u8; AES_GCM_IV_LENGTH];
        let sealed = seal(&key, &iv, b"data key bytes", b"aad").unwrap();

        assert_eq!(sealed.len(), 14 + AES_GCM_TAG_LENGTH);

        let opened = open(&key, &iv, &sealed, b"aad").unwrap();
        assert_eq!(opened.as_slice(), b"data key bytes");
    }

    #[test]
    fn wrong_key_fails() {
        let iv = [7u8; AES_GCM_IV_LENGTH];
        let sealed = seal(&test_key(1), &iv, b"secret", b"aad").unwrap();

        let result = open(&test_key(2), &iv, &sealed, b"aad");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn wrong_aad_fails() {
        let key = test_key(1);
        let iv = [7u8; AES_GCM_IV_LENGTH];
        let sealed = seal(&key, &iv, b"secret", b"aad").unwrap();

        assert!(open(&key, &iv, &sealed, b"other").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key(1);
        let iv = [7u8; AES_GCM_IV_LENGTH];
        let mut sealed = seal(&key, &iv, b"secret", b"aad").unwrap();
        sealed[0] ^= 0x01;

        assert!(open(&key, &iv, &sealed, b"aad").is_err());
    }

    #[test]
    fn short_input_rejected_before_decrypt() {
        let result = open(&test_key(1), &[0u8; AES_GCM_IV_LENGTH], &[0u8; 15], b"");
        assert_eq!(result, Err(CryptoError::CiphertextTooShort { len: 15 }));
    }
}
