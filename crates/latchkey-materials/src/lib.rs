//! Latchkey Cryptographic Materials
//!
//! The data model shared by every Latchkey component: algorithm suites,
//! encryption contexts and their canonical encoding, encrypted data keys,
//! encryption/decryption materials with their one-way data key lifecycle,
//! branch key material, and the [`MaterialsManager`] / [`Keyring`] seams.
//!
//! # Envelope Encryption
//!
//! ```text
//! EncryptionRequest
//!        │
//!        ▼
//! MaterialsManager ──► Keyring.on_encrypt
//!        │                 │ generate data key
//!        │                 │ wrap under wrapping key
//!        ▼                 ▼
//! EncryptionMaterial { data key, [EncryptedDataKey], trace }
//! ```
//!
//! Decryption runs the same path in reverse: the keyring is handed the
//! message's encrypted data keys and sets the recovered data key on fresh
//! decryption material.
//!
//! # Security
//!
//! - Data keys live in `Zeroizing` buffers and are wiped on drop
//! - A data key can be set exactly once; zeroing is terminal
//! - `Debug` output never includes key bytes
//! - Randomness comes from the [`Environment`], so production uses the OS RNG
//!   and tests stay deterministic

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod branch_key;
pub mod edk;
pub mod encryption_context;
pub mod env;
pub mod error;
pub mod manager;
pub mod material;
pub mod suite;
mod system_env;

pub use branch_key::BranchKeyMaterial;
pub use edk::EncryptedDataKey;
pub use encryption_context::{
    EncryptionContext, deserialize_encryption_context, serialize_encryption_context,
    serialize_encryption_context_with_length,
};
pub use env::Environment;
pub use error::{BoxError, MaterialError, MaterialsError, SerializationError};
pub use manager::{
    DecryptionRequest, DefaultMaterialsManager, EncryptionRequest, Keyring, MaterialsManager,
};
pub use material::{DecryptionMaterial, EncryptionMaterial, KeyringTrace, TraceFlags};
pub use suite::{AlgorithmSuite, AlgorithmSuiteId, Commitment, CommitmentPolicy};
pub use system_env::SystemEnv;
