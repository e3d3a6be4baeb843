//! Chaotic branch key store wrapper for fault injection testing
//!
//! Store wrapper that randomly fails reads so keyring error paths (fatal on
//! encrypt, one failed candidate on decrypt) get exercised. It also counts
//! every read, which makes cache hit/miss behaviour observable as store
//! round-trips.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use latchkey_materials::BranchKeyMaterial;

use super::{BranchKeyStore, KeyStoreInfo, StoreError};

/// Chaotic store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails reads with `StoreError::Io`
/// at the configured rate. `key_store_info` never fails and is not counted.
#[derive(Clone)]
pub struct ChaoticKeyStore<S: BranchKeyStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Reads attempted, including injected failures
    operation_count: Arc<AtomicUsize>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator; the same seed replays the same failures.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: BranchKeyStore> ChaoticKeyStore<S> {
    /// Wrap `inner`, failing reads with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total reads attempted across all clones.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Count one read and decide whether it fails.
    fn begin_operation(&self) -> Result<(), StoreError> {
        self.operation_count.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_fail(self.failure_rate);
        if fail {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: BranchKeyStore> BranchKeyStore for ChaoticKeyStore<S> {
    async fn get_active_branch_key(
        &self,
        branch_key_id: &str,
    ) -> Result<BranchKeyMaterial, StoreError> {
        self.begin_operation()?;
        self.inner.get_active_branch_key(branch_key_id).await
    }

    async fn get_branch_key_version(
        &self,
        branch_key_id: &str,
        branch_key_version: &str,
    ) -> Result<BranchKeyMaterial, StoreError> {
        self.begin_operation()?;
        self.inner.get_branch_key_version(branch_key_id, branch_key_version).await
    }

    fn key_store_info(&self) -> KeyStoreInfo {
        self.inner.key_store_info()
    }
}
