//! Derived wrapping key
//!
//! # Security Properties
//!
//! - Single use: one derived key wraps or unwraps exactly one data key
//! - Zeroized on drop

use zeroize::Zeroize;

use crate::kdf::DERIVED_KEY_LENGTH;

/// A 32-byte key produced by [`crate::kdf_counter_mode`].
///
/// Used for a single AES-256-GCM seal or open, then dropped.
pub struct DerivedKey {
    key: [u8; DERIVED_KEY_LENGTH],
}

impl DerivedKey {
    pub(crate) fn from_bytes(key: [u8; DERIVED_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// 32-byte AES-256-GCM key.
    pub fn as_bytes(&self) -> &[u8; DERIVED_KEY_LENGTH] {
        &self.key
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}
