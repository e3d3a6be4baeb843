//! Latchkey Cryptographic Primitives
//!
//! Building blocks for branch-key wrapping. Pure functions with deterministic
//! outputs. Callers provide salts and IVs so tests can fix them.
//!
//! # Key Lifecycle
//!
//! A long-lived branch key never encrypts data keys directly. Every wrap draws
//! a fresh salt, derives a single-use key from the branch key, and seals the
//! data key under it:
//!
//! ```text
//! Branch Key (32 bytes, versioned)
//!        │
//!        ▼
//! KDF in counter mode (HMAC-SHA256, label, salt) → Derived Key
//!        │
//!        ▼
//! AES-256-GCM (IV, AAD) → Wrapped Data Key || Tag
//! ```
//!
//! # Security
//!
//! Key Separation:
//! - A fresh 16-byte salt per wrap yields a distinct derived key per data key
//! - The label domain-separates this derivation from other uses of the key
//!
//! Authenticity:
//! - AES-GCM binds the wrapped key to the caller's AAD
//! - Failed authentication tag -> reject
//!
//! Hygiene:
//! - Derived keys and recovered plaintexts are zeroized on drop

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod derived_key;
pub mod error;
pub mod kdf;

pub use aead::{AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, open, seal};
pub use derived_key::DerivedKey;
pub use error::CryptoError;
pub use kdf::{DERIVED_KEY_LENGTH, KDF_IKM_LENGTH, KDF_SALT_LENGTH, kdf_counter_mode};
