//! Branch key material returned by a branch key store.

use zeroize::Zeroizing;

use crate::encryption_context::EncryptionContext;

/// A versioned branch key and its metadata.
///
/// The raw key is held in a [`Zeroizing`] buffer; every copy wipes itself on
/// drop, including copies evicted from a materials cache.
#[derive(Clone)]
pub struct BranchKeyMaterial {
    branch_key: Zeroizing<Vec<u8>>,
    branch_key_identifier: String,
    branch_key_version: String,
    encryption_context: EncryptionContext,
}

impl BranchKeyMaterial {
    /// Create branch key material.
    ///
    /// `branch_key_version` is the version UUID in its string form.
    pub fn new(
        branch_key: Zeroizing<Vec<u8>>,
        branch_key_identifier: impl Into<String>,
        branch_key_version: impl Into<String>,
        encryption_context: EncryptionContext,
    ) -> Self {
        Self {
            branch_key,
            branch_key_identifier: branch_key_identifier.into(),
            branch_key_version: branch_key_version.into(),
            encryption_context,
        }
    }

    /// Raw branch key bytes.
    pub fn branch_key(&self) -> &[u8] {
        &self.branch_key
    }

    /// Branch key identifier.
    pub fn branch_key_identifier(&self) -> &str {
        &self.branch_key_identifier
    }

    /// Branch key version (UUID string).
    pub fn branch_key_version(&self) -> &str {
        &self.branch_key_version
    }

    /// Branch key version as UTF-8 bytes.
    pub fn branch_key_version_bytes(&self) -> &[u8] {
        self.branch_key_version.as_bytes()
    }

    /// Encryption context stored with the branch key.
    pub fn encryption_context(&self) -> &EncryptionContext {
        &self.encryption_context
    }
}

impl std::fmt::Debug for BranchKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchKeyMaterial")
            .field("branch_key", &format_args!("<{} bytes redacted>", self.branch_key.len()))
            .field("branch_key_identifier", &self.branch_key_identifier)
            .field("branch_key_version", &self.branch_key_version)
            .field("encryption_context", &self.encryption_context)
            .finish()
    }
}
