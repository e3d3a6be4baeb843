//! Caching materials manager integration tests.
//!
//! The backing manager and the cache are both instrumented so each test can
//! assert exactly which collaborator calls a request produced.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use latchkey_cache::{
    CacheEntry, CacheError, CacheKey, CachingMaterialsManager, CachingMaterialsManagerConfig,
    CryptographicMaterialsCache, LocalCacheConfig, LocalCryptographicMaterialsCache,
};
use latchkey_harness::SimEnv;
use latchkey_materials::{
    AlgorithmSuiteId, BranchKeyMaterial, CommitmentPolicy, DecryptionMaterial, DecryptionRequest,
    EncryptedDataKey, EncryptionContext, EncryptionMaterial, EncryptionRequest, KeyringTrace,
    MaterialsError, MaterialsManager, TraceFlags,
};
use zeroize::Zeroizing;

const MAX_AGE: Duration = Duration::from_secs(60);

/// Cache wrapper that counts calls per operation.
struct CountingCache {
    inner: LocalCryptographicMaterialsCache<SimEnv>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingCache {
    fn new(env: &SimEnv) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalCryptographicMaterialsCache::new(LocalCacheConfig::default(), env.clone())
                .unwrap(),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    fn counts(&self) -> (usize, usize, usize) {
        (
            self.gets.load(Ordering::SeqCst),
            self.puts.load(Ordering::SeqCst),
            self.deletes.load(Ordering::SeqCst),
        )
    }
}

impl CryptographicMaterialsCache for CountingCache {
    fn put_encryption_material(
        &self,
        key: &CacheKey,
        material: EncryptionMaterial,
        plaintext_length: u64,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_encryption_material(key, material, plaintext_length, max_age)
    }

    fn put_decryption_material(
        &self,
        key: &CacheKey,
        material: DecryptionMaterial,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_decryption_material(key, material, max_age)
    }

    fn put_branch_key_material(
        &self,
        key: &CacheKey,
        material: BranchKeyMaterial,
        max_age: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_branch_key_material(key, material, max_age)
    }

    fn get_encryption_material(
        &self,
        key: &CacheKey,
        plaintext_length: u64,
    ) -> Result<Option<CacheEntry<EncryptionMaterial>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_encryption_material(key, plaintext_length)
    }

    fn get_decryption_material(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<DecryptionMaterial>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_decryption_material(key)
    }

    fn get_branch_key_material(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry<BranchKeyMaterial>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_branch_key_material(key)
    }

    fn delete(&self, key: &CacheKey) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key);
    }
}

/// Backing manager that hands out a distinct data key on every call,
/// starting from `[1; len]`.
#[derive(Default)]
struct StubManager {
    calls: AtomicUsize,
    /// Encrypt calls that arrived with a plaintext length
    calls_with_length: AtomicUsize,
    next_key: AtomicU8,
    /// Suite returned regardless of the request, when set
    suite_override: Option<AlgorithmSuiteId>,
    fail: bool,
}

impl StubManager {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn calls_with_length(&self) -> usize {
        self.calls_with_length.load(Ordering::SeqCst)
    }

    fn fresh_key(&self, len: usize) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![self.next_key.fetch_add(1, Ordering::SeqCst) + 1; len])
    }
}

#[async_trait]
impl MaterialsManager for StubManager {
    async fn get_encryption_materials(
        &self,
        request: EncryptionRequest,
    ) -> Result<EncryptionMaterial, MaterialsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MaterialsError::IncompleteMaterial { reason: "stub failure" });
        }
        if request.plaintext_length.is_some() {
            self.calls_with_length.fetch_add(1, Ordering::SeqCst);
        }

        let suite_id = self
            .suite_override
            .or(request.suite)
            .unwrap_or_else(|| request.commitment_policy.default_suite());
        let suite = suite_id.suite();

        let mut material = EncryptionMaterial::new(suite, request.encryption_context);
        material
            .set_unencrypted_data_key(
                self.fresh_key(suite.key_length_bytes()),
                KeyringTrace::new("stub", "key", TraceFlags::GENERATED_DATA_KEY),
            )
            .unwrap();
        material
            .add_encrypted_data_key(
                EncryptedDataKey::new("stub", b"key".to_vec(), b"wrapped".to_vec()),
                KeyringTrace::new("stub", "key", TraceFlags::ENCRYPTED_DATA_KEY),
            )
            .unwrap();
        Ok(material)
    }

    async fn decrypt_materials(
        &self,
        request: DecryptionRequest,
    ) -> Result<DecryptionMaterial, MaterialsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MaterialsError::IncompleteMaterial { reason: "stub failure" });
        }

        let suite = request.suite.suite();
        let mut material = DecryptionMaterial::new(suite, request.encryption_context);
        material
            .set_unencrypted_data_key(
                self.fresh_key(suite.key_length_bytes()),
                KeyringTrace::new("stub", "key", TraceFlags::DECRYPTED_DATA_KEY),
            )
            .unwrap();
        Ok(material)
    }
}

struct Fixture {
    env: SimEnv,
    cache: Arc<CountingCache>,
    manager: CachingMaterialsManager<Arc<StubManager>>,
    backing: Arc<StubManager>,
}

fn fixture_with(config: CachingMaterialsManagerConfig, backing: StubManager) -> Fixture {
    let env = SimEnv::with_seed(7);
    let cache = CountingCache::new(&env);
    let backing = Arc::new(backing);
    let manager =
        CachingMaterialsManager::new(Arc::clone(&backing), cache.clone(), config, &env).unwrap();

    Fixture { env, cache, manager, backing }
}

fn fixture() -> Fixture {
    fixture_with(CachingMaterialsManagerConfig::new(MAX_AGE), StubManager::default())
}

fn context() -> EncryptionContext {
    EncryptionContext::from([("purpose".to_string(), "test".to_string())])
}

fn encrypt_request(plaintext_length: Option<u64>) -> EncryptionRequest {
    EncryptionRequest {
        suite: None,
        encryption_context: context(),
        plaintext_length,
        commitment_policy: CommitmentPolicy::default(),
    }
}

fn decrypt_request(suite: AlgorithmSuiteId) -> DecryptionRequest {
    DecryptionRequest {
        suite,
        encrypted_data_keys: vec![EncryptedDataKey::new("stub", b"key".to_vec(), b"w".to_vec())],
        encryption_context: context(),
        commitment_policy: CommitmentPolicy::ForbidEncryptAllowDecrypt,
    }
}

#[test]
fn put_and_get_both_count_usage() {
    let env = SimEnv::with_seed(1);
    let cache =
        LocalCryptographicMaterialsCache::new(LocalCacheConfig::default(), env.clone()).unwrap();
    let suite = AlgorithmSuiteId::Aes256GcmHkdfSha512CommitKey.suite();
    let mut material = EncryptionMaterial::new(suite, EncryptionContext::new());
    material
        .set_unencrypted_data_key(
            Zeroizing::new(vec![1u8; suite.key_length_bytes()]),
            KeyringTrace::new("test", "key", TraceFlags::GENERATED_DATA_KEY),
        )
        .unwrap();
    let key = CacheKey::from_bytes(vec![0xAB; 64]);

    cache.put_encryption_material(&key, material, 1, Some(MAX_AGE)).unwrap();
    let entry = cache.get_encryption_material(&key, 1).unwrap().unwrap();

    assert_eq!(entry.bytes_encrypted, 2);
    assert_eq!(entry.messages_encrypted, 2);
}

#[tokio::test]
async fn non_cache_safe_suite_never_touches_cache() {
    let f = fixture();
    let request = EncryptionRequest {
        suite: Some(AlgorithmSuiteId::Aes256GcmIv12Tag16),
        commitment_policy: CommitmentPolicy::ForbidEncryptAllowDecrypt,
        ..encrypt_request(Some(10))
    };

    let material = f.manager.get_encryption_materials(request).await.unwrap();

    assert_eq!(f.cache.counts(), (0, 0, 0));
    assert_eq!(f.backing.calls(), 1);
    // Bypass hands the request through untouched
    assert_eq!(f.backing.calls_with_length(), 1);
    assert_eq!(material.suite().id(), AlgorithmSuiteId::Aes256GcmIv12Tag16);
    assert_eq!(material.unencrypted_data_key().unwrap(), &[1u8; 32][..]);
}

#[tokio::test]
async fn missing_plaintext_length_bypasses_cache() {
    let f = fixture();

    f.manager.get_encryption_materials(encrypt_request(None)).await.unwrap();
    f.manager.get_encryption_materials(encrypt_request(None)).await.unwrap();

    assert_eq!(f.cache.counts(), (0, 0, 0));
    assert_eq!(f.backing.calls(), 2);
}

#[tokio::test]
async fn second_encrypt_reuses_cached_material() {
    let f = fixture();

    let first = f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();
    let second = f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();

    assert_eq!(f.backing.calls(), 1);
    assert_eq!(f.backing.calls_with_length(), 0, "length must be stripped on a miss");
    assert_eq!(f.cache.counts(), (2, 1, 0));
    assert_eq!(first.unencrypted_data_key().unwrap(), second.unencrypted_data_key().unwrap());
}

#[tokio::test]
async fn zeroing_returned_material_leaves_cache_intact() {
    let f = fixture();

    let mut first = f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();
    first.zero_unencrypted_data_key().unwrap();

    let second = f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();
    assert_eq!(second.unencrypted_data_key().unwrap(), &[1u8; 32][..]);
    assert_eq!(f.backing.calls(), 1);
}

#[tokio::test]
async fn expired_entry_is_refetched() {
    let f = fixture();

    f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();
    f.env.advance(MAX_AGE + Duration::from_millis(1));
    let refreshed = f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();

    assert_eq!(f.backing.calls(), 2);
    assert_eq!(refreshed.unencrypted_data_key().unwrap(), &[2u8; 32][..]);
}

#[tokio::test]
async fn message_limit_forces_delete_and_refetch() {
    let config = CachingMaterialsManagerConfig {
        max_messages_encrypted: Some(2),
        ..CachingMaterialsManagerConfig::new(MAX_AGE)
    };
    let f = fixture_with(config, StubManager::default());

    for _ in 0..3 {
        f.manager.get_encryption_materials(encrypt_request(Some(1))).await.unwrap();
    }

    // Third request saw messages_encrypted = 3 > 2
    assert_eq!(f.backing.calls(), 2);
    assert_eq!(f.cache.counts(), (3, 2, 1));
}

#[tokio::test]
async fn byte_limit_forces_delete_and_refetch() {
    let config = CachingMaterialsManagerConfig {
        max_bytes_encrypted: Some(100),
        ..CachingMaterialsManagerConfig::new(MAX_AGE)
    };
    let f = fixture_with(config, StubManager::default());

    f.manager.get_encryption_materials(encrypt_request(Some(60))).await.unwrap();
    f.manager.get_encryption_materials(encrypt_request(Some(60))).await.unwrap();

    assert_eq!(f.backing.calls(), 2);
    assert_eq!(f.cache.counts().2, 1);
}

#[tokio::test]
async fn oversized_single_message_is_not_cached() {
    let config = CachingMaterialsManagerConfig {
        max_bytes_encrypted: Some(100),
        ..CachingMaterialsManagerConfig::new(MAX_AGE)
    };
    let f = fixture_with(config, StubManager::default());

    f.manager.get_encryption_materials(encrypt_request(Some(200))).await.unwrap();
    f.manager.get_encryption_materials(encrypt_request(Some(200))).await.unwrap();

    assert_eq!(f.backing.calls(), 2);
    assert_eq!(f.cache.counts(), (2, 0, 0));
    assert!(f.cache.inner.is_empty());
}

#[tokio::test]
async fn backing_choosing_unsafe_suite_is_not_cached() {
    let backing = StubManager {
        suite_override: Some(AlgorithmSuiteId::Aes128GcmIv12Tag16),
        ..StubManager::default()
    };
    let f = fixture_with(CachingMaterialsManagerConfig::new(MAX_AGE), backing);

    let material = f.manager.get_encryption_materials(encrypt_request(Some(10))).await.unwrap();

    assert_eq!(material.suite().id(), AlgorithmSuiteId::Aes128GcmIv12Tag16);
    assert_eq!(f.cache.counts(), (1, 0, 0));
}

#[tokio::test]
async fn backing_failure_propagates_and_caches_nothing() {
    let backing = StubManager { fail: true, ..StubManager::default() };
    let f = fixture_with(CachingMaterialsManagerConfig::new(MAX_AGE), backing);

    let result = f.manager.get_encryption_materials(encrypt_request(Some(10))).await;

    assert!(matches!(result, Err(MaterialsError::IncompleteMaterial { .. })));
    assert!(f.cache.inner.is_empty());
}

#[tokio::test]
async fn partitions_do_not_share_entries() {
    let env = SimEnv::with_seed(7);
    let cache = CountingCache::new(&env);
    let backing_a = Arc::new(StubManager::default());
    let backing_b = Arc::new(StubManager::default());

    let config = |partition: &str| CachingMaterialsManagerConfig {
        partition: Some(partition.to_string()),
        ..CachingMaterialsManagerConfig::new(MAX_AGE)
    };
    let a = CachingMaterialsManager::new(Arc::clone(&backing_a), cache.clone(), config("a"), &env)
        .unwrap();
    let b = CachingMaterialsManager::new(Arc::clone(&backing_b), cache.clone(), config("b"), &env)
        .unwrap();

    a.get_encryption_materials(encrypt_request(Some(1))).await.unwrap();
    b.get_encryption_materials(encrypt_request(Some(1))).await.unwrap();

    assert_eq!(backing_a.calls(), 1);
    assert_eq!(backing_b.calls(), 1);
    assert_eq!(cache.inner.len(), 2);
}

#[tokio::test]
async fn decrypt_reuses_cached_material_until_expiry() {
    let f = fixture();
    let suite = AlgorithmSuiteId::Aes256GcmIv12Tag16HkdfSha256;

    f.manager.decrypt_materials(decrypt_request(suite)).await.unwrap();
    f.manager.decrypt_materials(decrypt_request(suite)).await.unwrap();
    assert_eq!(f.backing.calls(), 1);

    f.env.advance(MAX_AGE + Duration::from_millis(1));
    f.manager.decrypt_materials(decrypt_request(suite)).await.unwrap();
    assert_eq!(f.backing.calls(), 2);
}

#[tokio::test]
async fn decrypt_with_unsafe_suite_bypasses_cache() {
    let f = fixture();

    f.manager.decrypt_materials(decrypt_request(AlgorithmSuiteId::Aes192GcmIv12Tag16)).await.unwrap();

    assert_eq!(f.cache.counts(), (0, 0, 0));
    assert_eq!(f.backing.calls(), 1);
}

#[tokio::test]
async fn decrypt_key_ignores_edk_order() {
    let f = fixture();
    let suite = AlgorithmSuiteId::Aes256GcmHkdfSha512CommitKey;
    let edks = vec![
        EncryptedDataKey::new("p1", b"a".to_vec(), b"x".to_vec()),
        EncryptedDataKey::new("p2", b"b".to_vec(), b"y".to_vec()),
    ];
    let mut reversed = edks.clone();
    reversed.reverse();

    for encrypted_data_keys in [edks, reversed] {
        let request = DecryptionRequest { encrypted_data_keys, ..decrypt_request(suite) };
        f.manager.decrypt_materials(request).await.unwrap();
    }

    assert_eq!(f.backing.calls(), 1);
}

#[tokio::test]
async fn cached_encrypt_material_must_satisfy_caller_policy() {
    let f = fixture();
    let forbid = EncryptionRequest {
        commitment_policy: CommitmentPolicy::ForbidEncryptAllowDecrypt,
        ..encrypt_request(Some(1))
    };
    let require = EncryptionRequest {
        commitment_policy: CommitmentPolicy::RequireEncryptRequireDecrypt,
        ..encrypt_request(Some(1))
    };

    let legacy = f.manager.get_encryption_materials(forbid).await.unwrap();
    assert!(!legacy.suite().is_committing());

    let committed = f.manager.get_encryption_materials(require.clone()).await.unwrap();
    assert!(committed.suite().is_committing());
    assert_eq!(f.backing.calls(), 2);

    // The committing material replaced the legacy entry
    let again = f.manager.get_encryption_materials(require).await.unwrap();
    assert_eq!(again.unencrypted_data_key().unwrap(), committed.unencrypted_data_key().unwrap());
    assert_eq!(f.backing.calls(), 2);
}

#[tokio::test]
async fn cached_decrypt_material_must_satisfy_caller_policy() {
    let f = fixture();
    let suite = AlgorithmSuiteId::Aes256GcmIv12Tag16HkdfSha256;

    f.manager.decrypt_materials(decrypt_request(suite)).await.unwrap();
    assert_eq!(f.backing.calls(), 1);

    let strict = DecryptionRequest {
        commitment_policy: CommitmentPolicy::RequireEncryptRequireDecrypt,
        ..decrypt_request(suite)
    };
    let result = f.manager.decrypt_materials(strict).await;

    assert!(matches!(result, Err(MaterialsError::Material(_))));
    assert_eq!(f.backing.calls(), 1);
}
