//! Cryptographic materials cache interface.
//!
//! A cache maps [`CacheKey`]s to one of three material kinds. Puts are typed,
//! so a put can never store the wrong kind; a get that finds a different kind
//! under the key reports [`CacheError::WrongMaterialKind`].
//!
//! Retrieved entries are snapshots: the material is a clone and the counters
//! reflect the state after this access. Callers own the clone and may zero
//! it without affecting other readers.

use std::time::Duration;

use latchkey_materials::{
    AlgorithmSuiteId, BranchKeyMaterial, DecryptionMaterial, EncryptionMaterial,
};
use thiserror::Error;

use crate::cache_key::CacheKey;

/// Kind of material stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// [`EncryptionMaterial`]
    Encryption,
    /// [`DecryptionMaterial`]
    Decryption,
    /// [`BranchKeyMaterial`]
    BranchKey,
}

impl std::fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encryption => f.write_str("encryption material"),
            Self::Decryption => f.write_str("decryption material"),
            Self::BranchKey => f.write_str("branch key material"),
        }
    }
}

/// Snapshot of a cache entry at the time of a get.
#[derive(Debug, Clone)]
pub struct CacheEntry<M> {
    /// Clone of the cached material
    pub material: M,
    /// Plaintext bytes encrypted under this material, including this access
    pub bytes_encrypted: u64,
    /// Messages encrypted under this material, including this access
    pub messages_encrypted: u64,
    /// Time since the entry was inserted, by the cache's clock
    pub age: Duration,
}

/// Cache failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Material built on a suite without a key derivation step
    #[error("suite {suite} is not safe to cache")]
    NotCacheSafe {
        /// Rejected suite
        suite: AlgorithmSuiteId,
    },

    /// Key holds a different kind of material than requested
    #[error("cache entry holds {found}, expected {expected}")]
    WrongMaterialKind {
        /// Kind the caller asked for
        expected: MaterialKind,
        /// Kind stored under the key
        found: MaterialKind,
    },

    /// Cache configuration rejected
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Shared store of cryptographic materials.
///
/// Implementations are internally synchronized and shared as
/// `Arc<dyn CryptographicMaterialsCache>`.
///
/// # Invariants
///
/// - `max_age` of `None` disables expiry for that entry
/// - A get never returns an entry older than its `max_age`
/// - Puts overwrite any existing entry under the key
pub trait CryptographicMaterialsCache: Send + Sync {
    /// Insert encryption material with `bytes_encrypted = plaintext_length`
    /// and `messages_encrypted = 1`.
    ///
    /// # Errors
    ///
    /// - `NotCacheSafe`: suite has no key derivation; nothing is inserted
    fn put_encryption_material(
        &self,
        key: &CacheKey,
        material: EncryptionMaterial,
        plaintext_length: u64,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Insert decryption material with zeroed counters.
    ///
    /// # Errors
    ///
    /// - `NotCacheSafe`: suite has no key derivation; nothing is inserted
    fn put_decryption_material(
        &self,
        key: &CacheKey,
        material: DecryptionMaterial,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Insert branch key material with zeroed counters.
    fn put_branch_key_material(
        &self,
        key: &CacheKey,
        material: BranchKeyMaterial,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Look up encryption material, charging one message of
    /// `plaintext_length` bytes to the entry on a hit.
    fn get_encryption_material(
        &self,
        key: &CacheKey,
        plaintext_length: u64,
    ) -> Result<Option<CacheEntry<EncryptionMaterial>>, CacheError>;

    /// Look up decryption material.
    fn get_decryption_material(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<DecryptionMaterial>>, CacheError>;

    /// Look up branch key material.
    fn get_branch_key_material(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<BranchKeyMaterial>>, CacheError>;

    /// Remove the entry under `key`, zeroing its data key. No-op if absent.
    fn delete(&self, key: &CacheKey);
}
