//! Branch key store abstraction
//!
//! The keyring only reads from a store: the active version of a branch key on
//! encrypt, a specific version on decrypt. Creating and rotating keys is the
//! store's own business and lives on the concrete implementations.

mod chaotic;
mod error;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
pub use chaotic::ChaoticKeyStore;
pub use error::StoreError;
use latchkey_materials::BranchKeyMaterial;
pub use memory::MemoryKeyStore;

/// Attribute holding the branch key id.
pub const BRANCH_KEY_IDENTIFIER_FIELD: &str = "branch-key-id";

/// Attribute holding the record type.
pub const TYPE_FIELD: &str = "type";

/// Attribute holding the logical key store name.
pub const TABLE_FIELD: &str = "tablename";

/// Attribute holding the hierarchy version.
pub const HIERARCHY_VERSION_FIELD: &str = "hierarchy-version";

/// Attribute of an active record naming the version it points at.
pub const KEY_VERSION_FIELD: &str = "version";

/// Hierarchy version written on every record.
pub const HIERARCHY_VERSION: &str = "1";

/// Type of the record pointing at the active version.
pub const BRANCH_KEY_ACTIVE_TYPE: &str = "branch:ACTIVE";

/// Type prefix of a versioned record, followed by the version UUID.
pub const BRANCH_KEY_TYPE_PREFIX: &str = "branch:version:";

/// Prefix marking caller-supplied encryption context entries.
pub const CUSTOM_ENCRYPTION_CONTEXT_PREFIX: &str = "aws-crypto-ec:";

/// Identity of a branch key store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreInfo {
    /// Name folded into cache entry ids; stores sharing it are
    /// interchangeable from the cache's point of view
    pub logical_key_store_name: String,
    /// Unique id of this store instance
    pub key_store_id: String,
}

/// Read access to versioned branch keys.
///
/// # Invariants
///
/// - Returned material's identifier equals the requested id
/// - `get_branch_key_version` returns material whose version equals the
///   requested version
/// - Material encryption context holds only custom entries
///   ([`CUSTOM_ENCRYPTION_CONTEXT_PREFIX`])
#[async_trait]
pub trait BranchKeyStore: Send + Sync {
    /// Current active version of `branch_key_id`.
    async fn get_active_branch_key(
        &self,
        branch_key_id: &str,
    ) -> Result<BranchKeyMaterial, StoreError>;

    /// Version `branch_key_version` of `branch_key_id`.
    async fn get_branch_key_version(
        &self,
        branch_key_id: &str,
        branch_key_version: &str,
    ) -> Result<BranchKeyMaterial, StoreError>;

    /// Store identity.
    fn key_store_info(&self) -> KeyStoreInfo;
}

#[async_trait]
impl<S: BranchKeyStore + ?Sized> BranchKeyStore for Arc<S> {
    async fn get_active_branch_key(
        &self,
        branch_key_id: &str,
    ) -> Result<BranchKeyMaterial, StoreError> {
        (**self).get_active_branch_key(branch_key_id).await
    }

    async fn get_branch_key_version(
        &self,
        branch_key_id: &str,
        branch_key_version: &str,
    ) -> Result<BranchKeyMaterial, StoreError> {
        (**self).get_branch_key_version(branch_key_id, branch_key_version).await
    }

    fn key_store_info(&self) -> KeyStoreInfo {
        (**self).key_store_info()
    }
}
