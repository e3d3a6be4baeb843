//! Error types for key derivation and wrapping.

use thiserror::Error;

/// Errors from the KDF and AEAD primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// KDF input key material has an unsupported length
    #[error("unsupported IKM length {actual}, expected {expected}")]
    UnsupportedIkmLength {
        /// Supported length
        expected: usize,
        /// Length provided
        actual: usize,
    },

    /// KDF salt has an unsupported length
    #[error("unsupported salt length {actual}, expected {expected}")]
    UnsupportedSaltLength {
        /// Supported length
        expected: usize,
        /// Length provided
        actual: usize,
    },

    /// HMAC rejected the input key material
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed {
        /// Reason for failure
        reason: String,
    },

    /// Sealed input is shorter than the authentication tag
    #[error("ciphertext of {len} bytes is shorter than the authentication tag")]
    CiphertextTooShort {
        /// Length provided
        len: usize,
    },

    /// AES-GCM refused to encrypt
    #[error("encryption failed: {reason}")]
    EncryptionFailed {
        /// Reason for failure
        reason: String,
    },

    /// Tag mismatch: wrong key, wrong AAD, or tampered ciphertext
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for failure
        reason: String,
    },
}
