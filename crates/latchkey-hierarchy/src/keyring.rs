//! Hierarchical keyring.
//!
//! Wraps each data key under a key derived from a versioned branch key. Branch
//! keys come from a [`BranchKeyStore`] and are cached for `cache_limit_ttl`
//! so a busy keyring touches the store once per TTL rather than once per
//! message.
//!
//! # Encrypt
//!
//! ```text
//! branch key id (fixed or supplier)
//!        │
//!        ▼
//! active branch key ◄── cache (encrypt scope) ◄── store on miss or stale
//!        │
//!        ▼
//! data key (existing, or fresh random) ──► wrap ──► EDK appended
//! ```
//!
//! # Decrypt
//!
//! EDKs are filtered to this provider and branch key id, then tried in
//! order. Each candidate is destructured, its version decompressed, the
//! matching branch key version fetched (cache, then store) and the data key
//! unwrapped. The first success wins; if none succeeds every failure is
//! reported together and the material is left as it was.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use latchkey_cache::{
    CacheEntry, CryptographicMaterialsCache, LocalCacheConfig, LocalCryptographicMaterialsCache,
};
use latchkey_materials::{
    BranchKeyMaterial, DecryptionMaterial, EncryptedDataKey, EncryptionContext,
    EncryptionMaterial, Environment, Keyring, KeyringTrace, MaterialError, TraceFlags,
};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    PROVIDER_ID,
    cache_id::{decrypt_cache_entry_id, encrypt_cache_entry_id},
    error::{CandidateFailure, KeyringError},
    store::BranchKeyStore,
    supplier::BranchKeyIdSupplier,
    version::decompress_bytes_to_uuidv4,
    wrapping::{
        SALT_LENGTH, destructure_ciphertext, unwrap_encrypted_data_key, wrap_plaintext_data_key,
    },
};

/// Capacity of the cache a keyring builds for itself.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;

/// Largest integer every consumer of the TTL can represent exactly (2^53 - 1).
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Length of a generated partition id.
const RANDOM_PARTITION_LENGTH: usize = 64;

/// AES-GCM IV length.
const IV_LENGTH: usize = latchkey_crypto::AES_GCM_IV_LENGTH;

/// Trace flags recorded when a data key is wrapped.
const ENCRYPT_FLAGS: TraceFlags = TraceFlags::ENCRYPTED_DATA_KEY.union(TraceFlags::SIGNED_ENC_CTX);

/// Trace flags recorded when a data key is unwrapped.
const DECRYPT_FLAGS: TraceFlags =
    TraceFlags::DECRYPTED_DATA_KEY.union(TraceFlags::VERIFIED_ENC_CTX);

/// Hierarchical keyring configuration.
///
/// Exactly one of `branch_key_id` and `branch_key_id_supplier` must be set,
/// and at most one of `cache` and `max_cache_size`.
#[derive(Clone, Default)]
pub struct HierarchicalKeyringConfig {
    /// Branch key used for every message
    pub branch_key_id: Option<String>,
    /// Chooses the branch key per message from its encryption context
    pub branch_key_id_supplier: Option<Arc<dyn BranchKeyIdSupplier>>,
    /// Seconds a cached branch key may be used before the store is asked again
    pub cache_limit_ttl_secs: u64,
    /// Cache shared with other keyrings or managers
    pub cache: Option<Arc<dyn CryptographicMaterialsCache>>,
    /// Capacity of the private cache, `DEFAULT_MAX_CACHE_SIZE` if unset
    pub max_cache_size: Option<usize>,
    /// Partition folded into cache entry ids, random if unset
    pub partition_id: Option<String>,
}

impl std::fmt::Debug for HierarchicalKeyringConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalKeyringConfig")
            .field("branch_key_id", &self.branch_key_id)
            .field("branch_key_id_supplier", &self.branch_key_id_supplier.is_some())
            .field("cache_limit_ttl_secs", &self.cache_limit_ttl_secs)
            .field("cache", &self.cache.is_some())
            .field("max_cache_size", &self.max_cache_size)
            .field("partition_id", &self.partition_id)
            .finish()
    }
}

impl HierarchicalKeyringConfig {
    /// Configuration for a single fixed branch key.
    pub fn with_branch_key_id(branch_key_id: impl Into<String>, cache_limit_ttl_secs: u64) -> Self {
        Self {
            branch_key_id: Some(branch_key_id.into()),
            cache_limit_ttl_secs,
            ..Self::default()
        }
    }

    /// Configuration choosing the branch key per message.
    pub fn with_supplier(
        supplier: Arc<dyn BranchKeyIdSupplier>,
        cache_limit_ttl_secs: u64,
    ) -> Self {
        Self {
            branch_key_id_supplier: Some(supplier),
            cache_limit_ttl_secs,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), KeyringError> {
        let config_error = |msg: &str| Err(KeyringError::Config(msg.to_string()));

        match (&self.branch_key_id, &self.branch_key_id_supplier) {
            (Some(_), Some(_)) => {
                return config_error("branch_key_id and branch_key_id_supplier are exclusive");
            },
            (None, None) => {
                return config_error("one of branch_key_id or branch_key_id_supplier is required");
            },
            (Some(id), None) if id.is_empty() => {
                return config_error("branch_key_id must not be empty");
            },
            _ => {},
        }

        let ttl_in_range = self
            .cache_limit_ttl_secs
            .checked_mul(1000)
            .is_some_and(|ms| ms <= MAX_SAFE_INTEGER);
        if !ttl_in_range {
            return config_error("cache_limit_ttl_secs * 1000 must not exceed 2^53 - 1");
        }

        if self.cache.is_some() && self.max_cache_size.is_some() {
            return config_error("max_cache_size cannot be set with a supplied cache");
        }
        if self.max_cache_size.is_some_and(|size| size as u64 > MAX_SAFE_INTEGER) {
            return config_error("max_cache_size must not exceed 2^53 - 1");
        }

        if self.partition_id.as_deref() == Some("") {
            return config_error("partition_id must not be empty");
        }

        Ok(())
    }
}

/// Where the branch key id for a message comes from.
#[derive(Clone)]
enum BranchKeyIdSource {
    Fixed(String),
    Supplier(Arc<dyn BranchKeyIdSupplier>),
}

/// Keyring wrapping data keys under branch keys from a [`BranchKeyStore`].
pub struct HierarchicalKeyring<S, E: Environment> {
    branch_key_id: BranchKeyIdSource,
    key_store: S,
    logical_key_store_name: String,
    cache: Arc<dyn CryptographicMaterialsCache>,
    cache_limit_ttl: Duration,
    partition_id: Vec<u8>,
    env: E,
}

impl<S, E: Environment> std::fmt::Debug for HierarchicalKeyring<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let branch_key_id = match &self.branch_key_id {
            BranchKeyIdSource::Fixed(id) => id.as_str(),
            BranchKeyIdSource::Supplier(_) => "<supplier>",
        };
        f.debug_struct("HierarchicalKeyring")
            .field("branch_key_id", &branch_key_id)
            .field("logical_key_store_name", &self.logical_key_store_name)
            .field("cache_limit_ttl", &self.cache_limit_ttl)
            .finish_non_exhaustive()
    }
}

impl<S: BranchKeyStore, E: Environment> HierarchicalKeyring<S, E> {
    /// Create a keyring reading branch keys from `key_store`.
    ///
    /// Builds a private [`LocalCryptographicMaterialsCache`] unless `config`
    /// supplies one. `env` provides data keys, salts, IVs and the random
    /// partition id.
    ///
    /// # Errors
    ///
    /// - `Config`: configuration failed validation
    /// - `Cache`: the private cache could not be built
    pub fn new(
        config: HierarchicalKeyringConfig,
        key_store: S,
        env: E,
    ) -> Result<Self, KeyringError> {
        config.validate()?;

        let branch_key_id = match (config.branch_key_id, config.branch_key_id_supplier) {
            (Some(id), _) => BranchKeyIdSource::Fixed(id),
            (None, Some(supplier)) => BranchKeyIdSource::Supplier(supplier),
            (None, None) => {
                return Err(KeyringError::Config("no branch key id source".to_string()));
            },
        };

        let cache = match config.cache {
            Some(cache) => cache,
            None => {
                let capacity = config.max_cache_size.unwrap_or(DEFAULT_MAX_CACHE_SIZE);
                let cache = LocalCryptographicMaterialsCache::new(
                    LocalCacheConfig::with_capacity(capacity),
                    env.clone(),
                )?;
                Arc::new(cache)
            },
        };

        let partition_id = match config.partition_id {
            Some(partition) => partition.into_bytes(),
            None => {
                let mut bytes = vec![0u8; RANDOM_PARTITION_LENGTH];
                env.random_bytes(&mut bytes);
                bytes
            },
        };

        let logical_key_store_name = key_store.key_store_info().logical_key_store_name;

        Ok(Self {
            branch_key_id,
            key_store,
            logical_key_store_name,
            cache,
            cache_limit_ttl: Duration::from_secs(config.cache_limit_ttl_secs),
            partition_id,
            env,
        })
    }

    /// The branch key store.
    pub fn key_store(&self) -> &S {
        &self.key_store
    }

    /// Partition folded into cache entry ids.
    pub fn partition_id(&self) -> &[u8] {
        &self.partition_id
    }

    /// How long a cached branch key is used.
    pub fn cache_limit_ttl(&self) -> Duration {
        self.cache_limit_ttl
    }

    /// Whether a cached branch key is too old to use.
    pub fn cache_entry_has_exceeded_limits<M>(&self, entry: &CacheEntry<M>) -> bool {
        entry.age > self.cache_limit_ttl
    }

    fn resolve_branch_key_id(&self, context: &EncryptionContext) -> Result<String, KeyringError> {
        match &self.branch_key_id {
            BranchKeyIdSource::Fixed(id) => Ok(id.clone()),
            BranchKeyIdSource::Supplier(supplier) => Ok(supplier.branch_key_id(context)?),
        }
    }

    fn trace(branch_key_id: &str, flags: TraceFlags) -> KeyringTrace {
        KeyringTrace::new(PROVIDER_ID, branch_key_id, flags)
    }

    /// Active branch key, from the cache while fresh.
    async fn active_branch_key(
        &self,
        branch_key_id: &str,
    ) -> Result<BranchKeyMaterial, KeyringError> {
        let cache_id = encrypt_cache_entry_id(
            &self.partition_id,
            self.logical_key_store_name.as_bytes(),
            branch_key_id,
        );

        let cached = self
            .cache
            .get_branch_key_material(&cache_id)?
            .filter(|entry| !self.cache_entry_has_exceeded_limits(entry));
        if let Some(entry) = cached {
            debug!(branch_key_id, "Using cached active branch key");
            return Ok(entry.material);
        }

        debug!(branch_key_id, "Fetching active branch key from store");
        let material = self.key_store.get_active_branch_key(branch_key_id).await.map_err(|e| {
            warn!(branch_key_id, error = %e, "Active branch key lookup failed");
            e
        })?;

        self.cache.put_branch_key_material(
            &cache_id,
            material.clone(),
            Some(self.cache_limit_ttl),
        )?;
        Ok(material)
    }

    /// One branch key version, from the cache while fresh.
    async fn branch_key_version(
        &self,
        branch_key_id: &str,
        branch_key_version: &str,
    ) -> Result<BranchKeyMaterial, KeyringError> {
        let cache_id = decrypt_cache_entry_id(
            &self.partition_id,
            self.logical_key_store_name.as_bytes(),
            branch_key_id,
            branch_key_version,
        );

        let cached = self
            .cache
            .get_branch_key_material(&cache_id)?
            .filter(|entry| !self.cache_entry_has_exceeded_limits(entry));
        if let Some(entry) = cached {
            debug!(branch_key_id, branch_key_version, "Using cached branch key version");
            return Ok(entry.material);
        }

        debug!(branch_key_id, branch_key_version, "Fetching branch key version from store");
        let material =
            self.key_store.get_branch_key_version(branch_key_id, branch_key_version).await?;

        self.cache.put_branch_key_material(
            &cache_id,
            material.clone(),
            Some(self.cache_limit_ttl),
        )?;
        Ok(material)
    }

    /// Recover the data key from one candidate EDK.
    async fn unwrap_candidate(
        &self,
        edk: &EncryptedDataKey,
        material: &DecryptionMaterial,
        branch_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
        let suite = material.suite();
        let parts = destructure_ciphertext(&edk.ciphertext, suite)?;
        let version = decompress_bytes_to_uuidv4(parts.branch_key_version)?;

        let branch_key = self.branch_key_version(branch_key_id, &version).await?;

        let context = material.encryption_context();
        unwrap_encrypted_data_key(&edk.ciphertext, &branch_key, context, suite)
    }
}

#[async_trait]
impl<S: BranchKeyStore, E: Environment> Keyring for HierarchicalKeyring<S, E> {
    type Error = KeyringError;

    async fn on_encrypt(
        &self,
        mut material: EncryptionMaterial,
    ) -> Result<EncryptionMaterial, KeyringError> {
        if material.is_data_key_zeroed() {
            return Err(MaterialError::DataKeyZeroed.into());
        }

        let branch_key_id = self.resolve_branch_key_id(material.encryption_context())?;
        let branch_key = self.active_branch_key(&branch_key_id).await?;

        let generated = if material.has_unencrypted_data_key() {
            None
        } else {
            let mut key = Zeroizing::new(vec![0u8; material.suite().key_length_bytes()]);
            self.env.random_bytes(&mut key);
            Some(key)
        };

        let mut salt = [0u8; SALT_LENGTH];
        let mut iv = [0u8; IV_LENGTH];
        self.env.random_bytes(&mut salt);
        self.env.random_bytes(&mut iv);

        let plaintext_data_key = match &generated {
            Some(key) => key.as_slice(),
            None => material.unencrypted_data_key()?,
        };
        let ciphertext = wrap_plaintext_data_key(
            plaintext_data_key,
            &branch_key,
            material.encryption_context(),
            &salt,
            &iv,
        )?;
        let edk = EncryptedDataKey::new(PROVIDER_ID, branch_key_id.as_bytes(), ciphertext);

        if let Some(key) = generated {
            material.set_unencrypted_data_key(
                key,
                Self::trace(&branch_key_id, TraceFlags::GENERATED_DATA_KEY),
            )?;
        }
        material.add_encrypted_data_key(edk, Self::trace(&branch_key_id, ENCRYPT_FLAGS))?;

        debug!(
            branch_key_id,
            branch_key_version = branch_key.branch_key_version(),
            "Wrapped data key"
        );
        Ok(material)
    }

    async fn on_decrypt(
        &self,
        material: &mut DecryptionMaterial,
        encrypted_data_keys: &[EncryptedDataKey],
    ) -> Result<(), KeyringError> {
        if material.has_unencrypted_data_key() {
            return Err(KeyringError::DataKeyAlreadyPresent);
        }
        if material.is_data_key_zeroed() {
            return Err(MaterialError::DataKeyZeroed.into());
        }

        let branch_key_id = self.resolve_branch_key_id(material.encryption_context())?;

        let candidates: Vec<&EncryptedDataKey> = encrypted_data_keys
            .iter()
            .filter(|edk| {
                edk.provider_id == PROVIDER_ID
                    && edk.provider_info_utf8() == Some(branch_key_id.as_str())
            })
            .collect();
        if candidates.is_empty() {
            return Err(KeyringError::NoMatchingEncryptedDataKey { branch_key_id });
        }

        let mut failures = Vec::new();
        for (index, edk) in candidates.into_iter().enumerate() {
            match self.unwrap_candidate(edk, material, &branch_key_id).await {
                Ok(plaintext_data_key) => {
                    material.set_unencrypted_data_key(
                        plaintext_data_key,
                        Self::trace(&branch_key_id, DECRYPT_FLAGS),
                    )?;
                    debug!(branch_key_id, candidate = index, "Unwrapped data key");
                    return Ok(());
                },
                Err(e) => {
                    debug!(branch_key_id, candidate = index, error = %e, "Candidate failed");
                    failures.push(CandidateFailure { index, source: Box::new(e) });
                },
            }
        }

        Err(KeyringError::UnableToDecrypt { failures })
    }
}

#[cfg(test)]
mod tests {
    use latchkey_harness::SimEnv;

    use super::*;
    use crate::supplier::SupplierError;

    #[test]
    fn exactly_one_id_source_required() {
        let neither = HierarchicalKeyringConfig::default();
        assert!(matches!(neither.validate(), Err(KeyringError::Config(_))));

        let supplier: Arc<dyn BranchKeyIdSupplier> =
            Arc::new(|_: &EncryptionContext| Ok::<_, SupplierError>("bk".to_string()));
        let both = HierarchicalKeyringConfig {
            branch_key_id_supplier: Some(supplier.clone()),
            ..HierarchicalKeyringConfig::with_branch_key_id("bk", 60)
        };
        assert!(matches!(both.validate(), Err(KeyringError::Config(_))));

        assert!(HierarchicalKeyringConfig::with_branch_key_id("bk", 60).validate().is_ok());
        assert!(HierarchicalKeyringConfig::with_supplier(supplier, 60).validate().is_ok());
        assert!(HierarchicalKeyringConfig::with_branch_key_id("", 60).validate().is_err());
    }

    #[test]
    fn ttl_bounds() {
        let max_secs = MAX_SAFE_INTEGER / 1000;
        for (ttl, valid) in
            [(0, true), (1, true), (max_secs, true), (max_secs + 1, false), (u64::MAX, false)]
        {
            let config = HierarchicalKeyringConfig::with_branch_key_id("bk", ttl);
            assert_eq!(config.validate().is_ok(), valid, "ttl = {ttl}");
        }
    }

    #[test]
    fn supplied_cache_excludes_max_size() {
        let cache: Arc<dyn CryptographicMaterialsCache> = Arc::new(
            LocalCryptographicMaterialsCache::new(LocalCacheConfig::default(), SimEnv::default())
                .unwrap(),
        );
        let config = HierarchicalKeyringConfig {
            cache: Some(cache),
            max_cache_size: Some(10),
            ..HierarchicalKeyringConfig::with_branch_key_id("bk", 60)
        };
        assert!(matches!(config.validate(), Err(KeyringError::Config(_))));
    }

    #[test]
    fn empty_partition_rejected() {
        let config = HierarchicalKeyringConfig {
            partition_id: Some(String::new()),
            ..HierarchicalKeyringConfig::with_branch_key_id("bk", 60)
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_cover_operation() {
        assert!(ENCRYPT_FLAGS.contains(TraceFlags::ENCRYPTED_DATA_KEY));
        assert!(ENCRYPT_FLAGS.contains(TraceFlags::SIGNED_ENC_CTX));
        assert!(DECRYPT_FLAGS.contains(TraceFlags::DECRYPTED_DATA_KEY));
        assert!(DECRYPT_FLAGS.contains(TraceFlags::VERIFIED_ENC_CTX));
    }

    #[test]
    fn exceeded_limits_compares_age_to_ttl() {
        let store = crate::store::MemoryKeyStore::new("table", SimEnv::default()).unwrap();
        let keyring = HierarchicalKeyring::new(
            HierarchicalKeyringConfig::with_branch_key_id("bk", 10),
            store,
            SimEnv::default(),
        )
        .unwrap();

        let entry = |secs| CacheEntry {
            material: (),
            bytes_encrypted: 0,
            messages_encrypted: 0,
            age: Duration::from_secs(secs),
        };
        assert!(!keyring.cache_entry_has_exceeded_limits(&entry(10)));
        assert!(keyring.cache_entry_has_exceeded_limits(&entry(11)));
    }

    #[test]
    fn partition_defaults_to_random_64_bytes() {
        let store = crate::store::MemoryKeyStore::new("table", SimEnv::default()).unwrap();
        let keyring = HierarchicalKeyring::new(
            HierarchicalKeyringConfig::with_branch_key_id("bk", 10),
            store.clone(),
            SimEnv::with_seed(1),
        )
        .unwrap();
        assert_eq!(keyring.partition_id().len(), 64);

        let named = HierarchicalKeyring::new(
            HierarchicalKeyringConfig {
                partition_id: Some("tenant-a".to_string()),
                ..HierarchicalKeyringConfig::with_branch_key_id("bk", 10)
            },
            store,
            SimEnv::with_seed(1),
        )
        .unwrap();
        assert_eq!(named.partition_id(), b"tenant-a");
    }
}
