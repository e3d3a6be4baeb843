//! Fuzz target for the hierarchical keyring under store failures
//!
//! Runs arbitrary encrypt/decrypt/rotate/advance sequences against a keyring
//! whose branch key store fails at a configurable rate.
//!
//! # Strategy
//!
//! - Failure rates 0% to 90% with a fuzzer-chosen chaos seed
//! - Several tenants chosen through a supplier
//! - Rotations between encrypt and decrypt
//!
//! # Invariants
//!
//! - The keyring NEVER panics on store errors
//! - A successful decrypt always yields the data key that was wrapped
//! - A failed decrypt leaves the material without a data key
//! - Encrypt failures are store failures, never crypto failures

#![no_main]

use std::{sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use latchkey_harness::SimEnv;
use latchkey_hierarchy::{
    ChaoticKeyStore, HierarchicalKeyring, HierarchicalKeyringConfig, KeyringError, MemoryKeyStore,
    SupplierError,
};
use latchkey_materials::{
    AlgorithmSuiteId, DecryptionMaterial, EncryptionContext, EncryptionMaterial, Keyring,
};
use libfuzzer_sys::fuzz_target;

const TENANTS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Clone, Arbitrary)]
struct KeyringScenario {
    /// Seed for the simulated environment
    env_seed: u64,
    /// Seed for ChaoticKeyStore RNG (deterministic failures)
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Cache TTL in seconds, 0-63
    ttl_secs: u8,
    operations: Vec<KeyringOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum KeyringOperation {
    Encrypt { tenant: u8, suite: u8 },
    DecryptLast,
    Rotate { tenant: u8 },
    Advance { secs: u8 },
}

fn context(tenant: &str) -> EncryptionContext {
    EncryptionContext::from([("tenant".to_string(), tenant.to_string())])
}

fuzz_target!(|scenario: KeyringScenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let env = SimEnv::with_seed(scenario.env_seed);

    let memory = MemoryKeyStore::new("fuzz-table", env.clone()).expect("valid store name");
    for tenant in TENANTS {
        memory
            .create_branch_key(Some(&format!("bk-{tenant}")), &EncryptionContext::new())
            .expect("fresh store");
    }
    let store = ChaoticKeyStore::with_seed(memory.clone(), failure_rate, scenario.chaos_seed);

    let supplier = Arc::new(|ec: &EncryptionContext| {
        ec.get("tenant")
            .map(|tenant| format!("bk-{tenant}"))
            .ok_or_else(|| SupplierError("no tenant".to_string()))
    });
    let keyring = HierarchicalKeyring::new(
        HierarchicalKeyringConfig::with_supplier(supplier, u64::from(scenario.ttl_secs % 64)),
        store,
        env.clone(),
    )
    .expect("valid configuration");

    let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    let mut last: Option<EncryptionMaterial> = None;

    for op in scenario.operations {
        match op {
            KeyringOperation::Encrypt { tenant, suite } => {
                let tenant = TENANTS[usize::from(tenant) % TENANTS.len()];
                let suite = AlgorithmSuiteId::ALL[usize::from(suite) % AlgorithmSuiteId::ALL.len()];
                let material = EncryptionMaterial::new(suite.suite(), context(tenant));

                match runtime.block_on(keyring.on_encrypt(material)) {
                    Ok(material) => last = Some(material),
                    Err(e) => assert!(matches!(e, KeyringError::Store(_)), "unexpected {e}"),
                }
            },
            KeyringOperation::DecryptLast => {
                let Some(encrypted) = &last else {
                    continue;
                };
                let mut material = DecryptionMaterial::new(
                    *encrypted.suite(),
                    encrypted.encryption_context().clone(),
                );

                let result = runtime
                    .block_on(keyring.on_decrypt(&mut material, encrypted.encrypted_data_keys()));
                match result {
                    Ok(()) => assert_eq!(
                        material.unencrypted_data_key().expect("decrypt sets the key"),
                        encrypted.unencrypted_data_key().expect("encrypt sets the key"),
                    ),
                    Err(KeyringError::UnableToDecrypt { failures }) => {
                        assert!(!material.has_unencrypted_data_key(), "failed decrypt wrote material");
                        for failure in failures {
                            assert!(
                                matches!(*failure.source, KeyringError::Store(_)),
                                "unexpected {}",
                                failure.source
                            );
                        }
                    },
                    Err(e) => panic!("unexpected {e}"),
                }
            },
            KeyringOperation::Rotate { tenant } => {
                let tenant = TENANTS[usize::from(tenant) % TENANTS.len()];
                memory.version_branch_key(&format!("bk-{tenant}")).expect("tenant key exists");
            },
            KeyringOperation::Advance { secs } => {
                env.advance(Duration::from_secs(u64::from(secs)));
            },
        }
    }
});
