//! Encrypted data keys.

use crate::{encryption_context::write_length_prefixed, error::SerializationError};

/// A data key wrapped by one keyring.
///
/// `provider_id` names the keyring family, `provider_info` identifies the
/// wrapping key within it, and `ciphertext` is the keyring-specific wrapped
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedDataKey {
    /// Keyring family identifier
    pub provider_id: String,
    /// Wrapping key identifier within the family
    pub provider_info: Vec<u8>,
    /// Wrapped data key
    pub ciphertext: Vec<u8>,
}

impl EncryptedDataKey {
    /// Create an encrypted data key.
    pub fn new(
        provider_id: impl Into<String>,
        provider_info: impl Into<Vec<u8>>,
        ciphertext: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_info: provider_info.into(),
            ciphertext: ciphertext.into(),
        }
    }

    /// Provider info decoded as UTF-8, if it is valid UTF-8.
    pub fn provider_info_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.provider_info).ok()
    }

    /// Canonical encoding: each field as `u16 BE length || bytes`, in
    /// provider id, provider info, ciphertext order.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializationError> {
        let mut out = Vec::with_capacity(
            6 + self.provider_id.len() + self.provider_info.len() + self.ciphertext.len(),
        );
        write_length_prefixed(&mut out, "provider id", self.provider_id.as_bytes())?;
        write_length_prefixed(&mut out, "provider info", &self.provider_info)?;
        write_length_prefixed(&mut out, "encrypted data key", &self.ciphertext)?;
        Ok(out)
    }
}
