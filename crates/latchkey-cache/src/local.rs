//! In-process LRU materials cache.
//!
//! Entries are bounded by count and ordered by recency of access. Expiry is
//! evaluated lazily on every get, and a detached background task peeks the
//! least-recently-used entry every `proactive_frequency` to drop it if it has
//! expired.
//!
//! The sweep is best effort: it only inspects the tail, so an idle expired
//! entry may survive up to about twice the sweep interval past its `max_age`.
//! Consumers that need exact TTLs check [`CacheEntry::age`] themselves.
//!
//! Every entry leaving the cache (eviction, expiry, deletion, overwrite) has
//! its data key zeroed before it is dropped.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use latchkey_materials::{
    AlgorithmSuite, BranchKeyMaterial, DecryptionMaterial, EncryptionMaterial, Environment,
};
use tracing::debug;

use crate::{
    cache_key::CacheKey,
    cmc::{CacheEntry, CacheError, CryptographicMaterialsCache, MaterialKind},
};

/// Default number of entries retained.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default interval between proactive expiry sweeps.
pub const DEFAULT_PROACTIVE_FREQUENCY: Duration = Duration::from_secs(60);

/// Local cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCacheConfig {
    /// Maximum number of entries; 0 retains nothing
    pub capacity: usize,
    /// Interval between proactive expiry sweeps
    pub proactive_frequency: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, proactive_frequency: DEFAULT_PROACTIVE_FREQUENCY }
    }
}

impl LocalCacheConfig {
    /// Config with the given capacity and the default sweep interval.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.proactive_frequency.is_zero() {
            return Err(CacheError::InvalidConfig(
                "proactive_frequency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
enum CachedMaterial {
    Encryption(EncryptionMaterial),
    Decryption(DecryptionMaterial),
    BranchKey(BranchKeyMaterial),
}

impl CachedMaterial {
    fn kind(&self) -> MaterialKind {
        match self {
            Self::Encryption(_) => MaterialKind::Encryption,
            Self::Decryption(_) => MaterialKind::Decryption,
            Self::BranchKey(_) => MaterialKind::BranchKey,
        }
    }

    /// Wipe the plaintext key held by this material.
    fn zero(&mut self) {
        // Cached encryption and decryption material always carries a key, so
        // the only failure is "not set", which leaves nothing to wipe.
        match self {
            Self::Encryption(material) => {
                material.zero_unencrypted_data_key().ok();
            },
            Self::Decryption(material) => {
                material.zero_unencrypted_data_key().ok();
            },
            // Branch keys live in `Zeroizing` buffers and are wiped on drop
            Self::BranchKey(_) => {},
        }
    }
}

struct StoredEntry<I> {
    material: CachedMaterial,
    bytes_encrypted: u64,
    messages_encrypted: u64,
    inserted_at: I,
    max_age: Option<Duration>,
    /// Position in the recency index
    last_used: u64,
}

/// LRU bookkeeping.
///
/// `recency` maps a monotonically increasing tick to the key last used at
/// that tick, so its first element is always the least recently used entry.
struct LruState<I> {
    entries: HashMap<CacheKey, StoredEntry<I>>,
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
}

impl<I> LruState<I> {
    fn new() -> Self {
        Self { entries: HashMap::new(), recency: BTreeMap::new(), next_tick: 0 }
    }

    fn tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Mark `key` most recently used and hand back its entry.
    fn touch(&mut self, key: &CacheKey) -> Option<&mut StoredEntry<I>> {
        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, key.clone());
        Some(entry)
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        let Some(mut entry) = self.entries.remove(key) else {
            return false;
        };
        self.recency.remove(&entry.last_used);
        entry.material.zero();
        true
    }

    fn insert(&mut self, key: &CacheKey, mut entry: StoredEntry<I>, capacity: usize) {
        self.remove(key);

        entry.last_used = self.tick();
        self.recency.insert(entry.last_used, key.clone());
        self.entries.insert(key.clone(), entry);

        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(mut evicted) = self.entries.remove(&oldest) {
                evicted.material.zero();
                debug!(key = %oldest.short(), "Evicted cache entry");
            }
        }

        debug_assert_eq!(self.entries.len(), self.recency.len());
    }
}

struct Shared<E: Environment> {
    env: E,
    capacity: usize,
    state: Mutex<LruState<E::Instant>>,
}

impl<E: Environment> Shared<E> {
    fn lock(&self) -> std::sync::MutexGuard<'_, LruState<E::Instant>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &StoredEntry<E::Instant>) -> bool {
        entry.max_age.is_some_and(|max_age| self.env.elapsed_since(entry.inserted_at) > max_age)
    }

    fn put(
        &self,
        key: &CacheKey,
        material: CachedMaterial,
        bytes: u64,
        messages: u64,
        max_age: Option<Duration>,
    ) {
        let entry = StoredEntry {
            material,
            bytes_encrypted: bytes,
            messages_encrypted: messages,
            inserted_at: self.env.now(),
            max_age,
            last_used: 0,
        };
        self.lock().insert(key, entry, self.capacity);
    }

    /// Shared lookup: expiry, kind check, counter update, recency update.
    fn get(
        &self,
        key: &CacheKey,
        expected: MaterialKind,
        charge: Option<u64>,
    ) -> Result<Option<CacheEntry<CachedMaterial>>, CacheError> {
        let mut state = self.lock();

        let Some(entry) = state.entries.get(key) else {
            debug!(key = %key.short(), "Cache miss");
            return Ok(None);
        };

        if self.is_expired(entry) {
            state.remove(key);
            debug!(key = %key.short(), "Cache entry expired on read");
            return Ok(None);
        }

        let found = entry.material.kind();
        if found != expected {
            return Err(CacheError::WrongMaterialKind { expected, found });
        }

        let Some(entry) = state.touch(key) else {
            return Ok(None);
        };
        if let Some(plaintext_length) = charge {
            entry.bytes_encrypted = entry.bytes_encrypted.saturating_add(plaintext_length);
            entry.messages_encrypted = entry.messages_encrypted.saturating_add(1);
        }

        debug!(key = %key.short(), "Cache hit");
        Ok(Some(CacheEntry {
            material: entry.material.clone(),
            bytes_encrypted: entry.bytes_encrypted,
            messages_encrypted: entry.messages_encrypted,
            age: self.env.elapsed_since(entry.inserted_at),
        }))
    }

    /// Peek the least recently used entry and drop it if expired.
    fn sweep_tail(&self) {
        let mut state = self.lock();
        let Some((_, key)) = state.recency.first_key_value() else {
            return;
        };
        let key = key.clone();

        let expired = state.entries.get(&key).is_some_and(|entry| self.is_expired(entry));
        if expired {
            state.remove(&key);
            debug!(key = %key.short(), "Proactive sweep dropped expired entry");
        }
    }
}

/// Count-bounded LRU cache with per-entry TTL.
///
/// Clones share the same storage.
pub struct LocalCryptographicMaterialsCache<E: Environment> {
    shared: Arc<Shared<E>>,
}

impl<E: Environment> Clone for LocalCryptographicMaterialsCache<E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<E: Environment> std::fmt::Debug for LocalCryptographicMaterialsCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCryptographicMaterialsCache")
            .field("capacity", &self.shared.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> LocalCryptographicMaterialsCache<E> {
    /// Create a cache and, when called inside a Tokio runtime, start its
    /// proactive expiry sweep.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig`: configuration failed validation
    pub fn new(config: LocalCacheConfig, env: E) -> Result<Self, CacheError> {
        config.validate()?;

        let cache = Self {
            shared: Arc::new(Shared {
                env,
                capacity: config.capacity,
                state: Mutex::new(LruState::new()),
            }),
        };
        cache.spawn_proactive_eviction(config.proactive_frequency);

        Ok(cache)
    }

    /// Start the detached sweep task.
    ///
    /// The task holds only a weak reference and exits once every handle to
    /// the cache is dropped. Returns `false` when no Tokio runtime is
    /// available, in which case expiry is enforced on read only.
    fn spawn_proactive_eviction(&self, frequency: Duration) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, proactive eviction disabled");
            return false;
        };

        let weak: Weak<Shared<E>> = Arc::downgrade(&self.shared);
        let env = self.shared.env.clone();

        handle.spawn(async move {
            debug!(?frequency, "Proactive eviction started");
            loop {
                env.sleep(frequency).await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.sweep_tail();
            }
            debug!("Proactive eviction stopped");
        });

        true
    }

    /// Number of resident entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

fn require_cache_safe(suite: &AlgorithmSuite) -> Result<(), CacheError> {
    if suite.cache_safe() {
        Ok(())
    } else {
        Err(CacheError::NotCacheSafe { suite: suite.id() })
    }
}

impl<E: Environment> CryptographicMaterialsCache for LocalCryptographicMaterialsCache<E> {
    fn put_encryption_material(
        &self,
        key: &CacheKey,
        material: EncryptionMaterial,
        plaintext_length: u64,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError> {
        require_cache_safe(material.suite())?;
        self.shared.put(key, CachedMaterial::Encryption(material), plaintext_length, 1, max_age);
        Ok(())
    }

    fn put_decryption_material(
        &self,
        key: &CacheKey,
        material: DecryptionMaterial,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError> {
        require_cache_safe(material.suite())?;
        self.shared.put(key, CachedMaterial::Decryption(material), 0, 0, max_age);
        Ok(())
    }

    fn put_branch_key_material(
        &self,
        key: &CacheKey,
        material: BranchKeyMaterial,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.shared.put(key, CachedMaterial::BranchKey(material), 0, 0, max_age);
        Ok(())
    }

    fn get_encryption_material(
        &self,
        key: &CacheKey,
        plaintext_length: u64,
    ) -> Result<Option<CacheEntry<EncryptionMaterial>>, CacheError> {
        let entry = self.shared.get(key, MaterialKind::Encryption, Some(plaintext_length))?;
        Ok(entry.and_then(|entry| match entry.material {
            CachedMaterial::Encryption(material) => Some(CacheEntry {
                material,
                bytes_encrypted: entry.bytes_encrypted,
                messages_encrypted: entry.messages_encrypted,
                age: entry.age,
            }),
            _ => None,
        }))
    }

    fn get_decryption_material(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<DecryptionMaterial>>, CacheError> {
        let entry = self.shared.get(key, MaterialKind::Decryption, None)?;
        Ok(entry.and_then(|entry| match entry.material {
            CachedMaterial::Decryption(material) => Some(CacheEntry {
                material,
                bytes_encrypted: entry.bytes_encrypted,
                messages_encrypted: entry.messages_encrypted,
                age: entry.age,
            }),
            _ => None,
        }))
    }

    fn get_branch_key_material(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<BranchKeyMaterial>>, CacheError> {
        let entry = self.shared.get(key, MaterialKind::BranchKey, None)?;
        Ok(entry.and_then(|entry| match entry.material {
            CachedMaterial::BranchKey(material) => Some(CacheEntry {
                material,
                bytes_encrypted: entry.bytes_encrypted,
                messages_encrypted: entry.messages_encrypted,
                age: entry.age,
            }),
            _ => None,
        }))
    }

    fn delete(&self, key: &CacheKey) {
        if self.shared.lock().remove(key) {
            debug!(key = %key.short(), "Deleted cache entry");
        }
    }
}
