//! Fuzz target for the local materials cache state machine
//!
//! Drives a small `LocalCryptographicMaterialsCache` through arbitrary puts,
//! gets, deletes and clock advances on a simulated clock.
//!
//! # Invariants
//!
//! - Resident entries NEVER exceed capacity
//! - An entry older than its max age is never returned
//! - A get straight after a put (no clock movement) hits, unless capacity is 0
//! - Material comes back under the key it was stored under

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use latchkey_cache::{CacheKey, CryptographicMaterialsCache, LocalCacheConfig, LocalCryptographicMaterialsCache};
use latchkey_harness::SimEnv;
use latchkey_materials::{BranchKeyMaterial, EncryptionContext};
use libfuzzer_sys::fuzz_target;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Arbitrary)]
struct CacheScenario {
    /// Capacity 0-7
    capacity: u8,
    /// Max age 1-16 seconds
    max_age_secs: u8,
    operations: Vec<CacheOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum CacheOperation {
    Put { key: u8 },
    Get { key: u8 },
    Delete { key: u8 },
    Advance { secs: u8 },
}

fn cache_key(key: u8) -> CacheKey {
    CacheKey::from_bytes(vec![key % 16; 64])
}

fn material(key: u8) -> BranchKeyMaterial {
    BranchKeyMaterial::new(
        Zeroizing::new(vec![key % 16; 32]),
        format!("bk-{}", key % 16),
        "version",
        EncryptionContext::new(),
    )
}

fuzz_target!(|scenario: CacheScenario| {
    let capacity = usize::from(scenario.capacity % 8);
    let max_age = Duration::from_secs(u64::from(scenario.max_age_secs % 16) + 1);

    let env = SimEnv::default();
    let Ok(cache) = LocalCryptographicMaterialsCache::new(LocalCacheConfig::with_capacity(capacity), env.clone()) else {
        return;
    };

    for op in scenario.operations {
        match op {
            CacheOperation::Put { key } => {
                cache
                    .put_branch_key_material(&cache_key(key), material(key), Some(max_age))
                    .expect("branch key puts are always accepted");

                let hit = cache.get_branch_key_material(&cache_key(key)).expect("same kind");
                assert_eq!(hit.is_some(), capacity > 0);
            },
            CacheOperation::Get { key } => {
                if let Some(entry) = cache.get_branch_key_material(&cache_key(key)).expect("same kind") {
                    assert!(entry.age <= max_age);
                    assert_eq!(entry.material.branch_key_identifier(), format!("bk-{}", key % 16));
                }
            },
            CacheOperation::Delete { key } => {
                cache.delete(&cache_key(key));
                assert!(cache.get_branch_key_material(&cache_key(key)).expect("same kind").is_none());
            },
            CacheOperation::Advance { secs } => {
                env.advance(Duration::from_secs(u64::from(secs % 32)));
            },
        }

        assert!(cache.len() <= capacity);
    }
});
