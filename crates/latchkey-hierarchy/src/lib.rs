//! Latchkey Hierarchical Keyring
//!
//! Wraps data keys under keys derived from versioned branch keys. A branch key
//! lives in a [`BranchKeyStore`]; the keyring caches it per partition, so one
//! store round-trip serves every message until the cache TTL runs out.
//!
//! # Architecture
//!
//! ```text
//! HierarchicalKeyring
//!   ├── BranchKeyIdSupplier (or fixed id)
//!   ├── CryptographicMaterialsCache  (branch keys, SHA-384 entry ids)
//!   ├── BranchKeyStore               (active key / specific version)
//!   └── wrapping                     (KDF + AES-256-GCM, fixed EDK layout)
//! ```
//!
//! # Encrypted data key
//!
//! ```text
//! provider_id   = "aws-kms-hierarchy"
//! provider_info = branch key id (UTF-8)
//! ciphertext    = salt(16) || iv(12) || version(16) || key(keyLen) || tag(16)
//! ```
//!
//! # Security
//!
//! - Every wrap draws a fresh salt, so every data key has its own wrapping key
//! - The AAD binds branch key id, version and encryption context
//! - Failed decrypts never modify the material
//! - Partition id and logical store name keep unrelated keyrings out of each
//!   other's cache entries

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache_id;
pub mod error;
pub mod keyring;
pub mod store;
pub mod supplier;
pub mod version;
pub mod wrapping;

pub use cache_id::{decrypt_cache_entry_id, encrypt_cache_entry_id};
pub use error::{CandidateFailure, KeyringError, VersionError};
pub use keyring::{DEFAULT_MAX_CACHE_SIZE, HierarchicalKeyring, HierarchicalKeyringConfig};
pub use store::{BranchKeyStore, ChaoticKeyStore, KeyStoreInfo, MemoryKeyStore, StoreError};
pub use supplier::{BranchKeyIdSupplier, SupplierError};
pub use version::{
    COMPRESSED_VERSION_LENGTH, decompress_bytes_to_uuidv4, uuidv4_to_compressed_bytes,
};
pub use wrapping::{
    CiphertextParts, SALT_LENGTH, destructure_ciphertext, expected_ciphertext_length,
    unwrap_encrypted_data_key, wrap_aad, wrap_plaintext_data_key,
};

/// Provider id of every EDK this keyring writes; also the KDF label and AAD
/// prefix.
pub const PROVIDER_ID: &str = "aws-kms-hierarchy";
