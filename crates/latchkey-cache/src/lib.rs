//! Latchkey Materials Caching
//!
//! Reuses data keys across messages so the key management backend is not
//! consulted for every encrypt and decrypt.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  CachingMaterialsManager     │  limits: age, messages, bytes
//! └──────────────┬───────────────┘
//!        hit     │     miss
//!   ┌────────────┴────────────┐
//!   ▼                         ▼
//! ┌──────────────────┐  ┌──────────────────────┐
//! │ Materials Cache  │  │ Backing Manager      │
//! │ (LRU + TTL)      │  │ (keyring)            │
//! └──────────────────┘  └──────────────────────┘
//! ```
//!
//! Cache keys are SHA-512 digests over a partition string and every request
//! input that affects the material, so managers with distinct partitions can
//! share one cache without observing each other's entries.
//!
//! # Security
//!
//! - Only suites with a key derivation step are cached; reusing a raw data
//!   key across messages would reuse the content encryption key directly
//! - Every entry leaving the cache has its data key zeroed
//! - Callers always receive their own copy of cached material

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache_key;
pub mod caching_cmm;
pub mod cmc;
pub mod local;

pub use cache_key::{
    CacheKey, build_decryption_material_cache_key, build_encryption_material_cache_key,
    encrypted_data_keys_hash, encryption_context_hash, portable_compare,
};
pub use caching_cmm::{
    CachingMaterialsManager, CachingMaterialsManagerConfig, MAX_BYTES_PER_KEY,
    MAX_MESSAGES_PER_KEY,
};
pub use cmc::{CacheEntry, CacheError, CryptographicMaterialsCache, MaterialKind};
pub use local::{LocalCacheConfig, LocalCryptographicMaterialsCache};
