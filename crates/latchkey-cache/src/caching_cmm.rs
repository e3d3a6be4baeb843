//! Caching materials manager.
//!
//! Wraps a backing [`MaterialsManager`] and reuses the material it produces
//! for up to `max_age`, `max_messages_encrypted` messages and
//! `max_bytes_encrypted` plaintext bytes per cached key.
//!
//! # Encrypt path
//!
//! ```text
//! pinned suite not cache safe, or no plaintext length ──► backing source
//!        │
//!        ▼
//! cache hit within limits and policy ──► clone
//! cache hit over limits or policy    ──► delete, fall through
//!        │
//!        ▼
//! backing source (plaintext length stripped)
//!        │
//!        ├── suite not cache safe          ──► return as is
//!        ├── this message alone over limits ──► return as is, not cached
//!        └── otherwise                      ──► put, return clone
//! ```
//!
//! Material handed to the caller is always a copy the caller owns, so zeroing
//! it never disturbs other readers of the cache.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use latchkey_materials::{
    DecryptionMaterial, DecryptionRequest, DefaultMaterialsManager, EncryptionMaterial,
    EncryptionRequest, Environment, Keyring, MaterialsError, MaterialsManager,
};
use tracing::debug;

use crate::{
    cache_key::{build_decryption_material_cache_key, build_encryption_material_cache_key},
    cmc::{CacheEntry, CacheError, CryptographicMaterialsCache},
};

/// Upper bound on plaintext bytes encrypted under one cached data key
/// (2^53 - 1).
pub const MAX_BYTES_PER_KEY: u64 = (1 << 53) - 1;

/// Upper bound on messages encrypted under one cached data key (2^32).
pub const MAX_MESSAGES_PER_KEY: u64 = 1 << 32;

/// Length of a generated partition before base64 encoding.
const RANDOM_PARTITION_LENGTH: usize = 16;

/// Caching materials manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachingMaterialsManagerConfig {
    /// Maximum age of reused material; must be non-zero
    pub max_age: Duration,
    /// Plaintext bytes allowed per cached key, `MAX_BYTES_PER_KEY` if unset
    pub max_bytes_encrypted: Option<u64>,
    /// Messages allowed per cached key, `MAX_MESSAGES_PER_KEY` if unset
    pub max_messages_encrypted: Option<u64>,
    /// Cache key scope; random if unset
    pub partition: Option<String>,
}

impl CachingMaterialsManagerConfig {
    /// Config with the given `max_age` and default limits.
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            max_bytes_encrypted: None,
            max_messages_encrypted: None,
            partition: None,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), MaterialsError> {
        if self.max_age.is_zero() {
            return Err(MaterialsError::Config("max_age must be greater than zero".to_string()));
        }

        let out_of_range = |max: u64| move |v: &u64| *v == 0 || *v >= max;

        if let Some(max_bytes) = self.max_bytes_encrypted.filter(out_of_range(MAX_BYTES_PER_KEY)) {
            return Err(MaterialsError::Config(format!(
                "max_bytes_encrypted must be in 1..{MAX_BYTES_PER_KEY}, got {max_bytes}"
            )));
        }

        if let Some(max_messages) =
            self.max_messages_encrypted.filter(out_of_range(MAX_MESSAGES_PER_KEY))
        {
            return Err(MaterialsError::Config(format!(
                "max_messages_encrypted must be in 1..{MAX_MESSAGES_PER_KEY}, got {max_messages}"
            )));
        }

        if self.partition.as_deref().is_some_and(str::is_empty) {
            return Err(MaterialsError::Config("partition must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Usage limits applied to every cached entry.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_age: Duration,
    max_bytes_encrypted: u64,
    max_messages_encrypted: u64,
}

impl Limits {
    fn exceeded<M>(&self, entry: &CacheEntry<M>) -> bool {
        entry.age > self.max_age
            || entry.messages_encrypted > self.max_messages_encrypted
            || entry.bytes_encrypted > self.max_bytes_encrypted
    }
}

/// Materials manager that reuses material from a shared cache.
pub struct CachingMaterialsManager<M> {
    backing: M,
    cache: Arc<dyn CryptographicMaterialsCache>,
    partition: String,
    limits: Limits,
}

impl<M> std::fmt::Debug for CachingMaterialsManager<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingMaterialsManager")
            .field("partition", &self.partition)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl<M: MaterialsManager> CachingMaterialsManager<M> {
    /// Wrap `backing` with `cache`.
    ///
    /// `env` supplies the random partition when none is configured.
    ///
    /// # Errors
    ///
    /// - `Config`: configuration failed validation
    pub fn new<E: Environment>(
        backing: M,
        cache: Arc<dyn CryptographicMaterialsCache>,
        config: CachingMaterialsManagerConfig,
        env: &E,
    ) -> Result<Self, MaterialsError> {
        config.validate()?;

        let partition = config.partition.unwrap_or_else(|| {
            let mut bytes = [0u8; RANDOM_PARTITION_LENGTH];
            env.random_bytes(&mut bytes);
            STANDARD.encode(bytes)
        });

        Ok(Self {
            backing,
            cache,
            partition,
            limits: Limits {
                max_age: config.max_age,
                max_bytes_encrypted: config.max_bytes_encrypted.unwrap_or(MAX_BYTES_PER_KEY),
                max_messages_encrypted: config
                    .max_messages_encrypted
                    .unwrap_or(MAX_MESSAGES_PER_KEY),
            },
        })
    }

    /// Partition folded into every cache key.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// The backing materials source.
    pub fn backing(&self) -> &M {
        &self.backing
    }
}

impl<K: Keyring> CachingMaterialsManager<DefaultMaterialsManager<K>> {
    /// Cache material produced by `keyring` through a
    /// [`DefaultMaterialsManager`].
    pub fn with_keyring<E: Environment>(
        keyring: K,
        cache: Arc<dyn CryptographicMaterialsCache>,
        config: CachingMaterialsManagerConfig,
        env: &E,
    ) -> Result<Self, MaterialsError> {
        Self::new(DefaultMaterialsManager::new(keyring), cache, config, env)
    }
}

fn cache_error(e: CacheError) -> MaterialsError {
    MaterialsError::Cache { source: Box::new(e) }
}

#[async_trait]
impl<M: MaterialsManager> MaterialsManager for CachingMaterialsManager<M> {
    async fn get_encryption_materials(
        &self,
        request: EncryptionRequest,
    ) -> Result<EncryptionMaterial, MaterialsError> {
        let pinned_safe = request.suite.is_none_or(|id| id.suite().cache_safe());
        let plaintext_length = match request.plaintext_length {
            Some(len) if pinned_safe => len,
            _ => return self.backing.get_encryption_materials(request).await,
        };

        let key = build_encryption_material_cache_key(
            self.partition.as_bytes(),
            request.suite,
            &request.encryption_context,
        )?;

        if let Some(entry) =
            self.cache.get_encryption_material(&key, plaintext_length).map_err(cache_error)?
        {
            let policy_allows =
                request.commitment_policy.check_encrypt(entry.material.suite()).is_ok();
            if policy_allows && !self.limits.exceeded(&entry) {
                debug!(key = %key.short(), "Reusing cached encryption material");
                return Ok(entry.material);
            }
            debug!(
                key = %key.short(),
                policy_allows,
                messages = entry.messages_encrypted,
                bytes = entry.bytes_encrypted,
                "Cached encryption material unusable, deleting"
            );
            self.cache.delete(&key);
        }

        let backing_request = EncryptionRequest { plaintext_length: None, ..request };
        let material = self.backing.get_encryption_materials(backing_request).await?;

        if !material.suite().cache_safe() {
            return Ok(material);
        }

        let first_use = CacheEntry {
            material: (),
            bytes_encrypted: plaintext_length,
            messages_encrypted: 1,
            age: Duration::ZERO,
        };
        if self.limits.exceeded(&first_use) {
            debug!(plaintext_length, "Single message exceeds limits, not caching");
            return Ok(material);
        }

        self.cache
            .put_encryption_material(
                &key,
                material.clone(),
                plaintext_length,
                Some(self.limits.max_age),
            )
            .map_err(cache_error)?;

        Ok(material)
    }

    async fn decrypt_materials(
        &self,
        request: DecryptionRequest,
    ) -> Result<DecryptionMaterial, MaterialsError> {
        request.commitment_policy.check_decrypt(&request.suite.suite())?;

        if !request.suite.suite().cache_safe() {
            return self.backing.decrypt_materials(request).await;
        }

        let key = build_decryption_material_cache_key(
            self.partition.as_bytes(),
            request.suite,
            &request.encrypted_data_keys,
            &request.encryption_context,
        )?;

        if let Some(entry) = self.cache.get_decryption_material(&key).map_err(cache_error)? {
            if !self.limits.exceeded(&entry) {
                debug!(key = %key.short(), "Reusing cached decryption material");
                return Ok(entry.material);
            }
            debug!(key = %key.short(), "Cached decryption material expired, deleting");
            self.cache.delete(&key);
        }

        let material = self.backing.decrypt_materials(request).await?;
        self.cache
            .put_decryption_material(&key, material.clone(), Some(self.limits.max_age))
            .map_err(cache_error)?;

        Ok(material)
    }
}
