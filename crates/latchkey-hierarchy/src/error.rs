//! Error types for the hierarchical keyring.

use latchkey_cache::CacheError;
use latchkey_crypto::CryptoError;
use latchkey_materials::{MaterialError, SerializationError};
use thiserror::Error;

use crate::{store::StoreError, supplier::SupplierError};

/// Branch key version compression failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Version string is not a hyphenated RFC 4122 version 4 UUID
    #[error("branch key version {version:?} is not a UUIDv4")]
    NotUuidV4 {
        /// Rejected input
        version: String,
    },

    /// Compressed version does not decode to a version 4 UUID
    #[error("compressed branch key version does not represent a UUIDv4")]
    CompressedNotUuidV4,

    /// Compressed version has the wrong length
    #[error("compressed branch key version must be 16 bytes, got {len}")]
    InvalidCompressedLength {
        /// Length provided
        len: usize,
    },
}

/// One failed candidate during decrypt.
#[derive(Debug)]
pub struct CandidateFailure {
    /// Position among the EDKs that matched this keyring
    pub index: usize,
    /// Why the candidate could not be unwrapped
    pub source: Box<KeyringError>,
}

impl std::fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "candidate #{}: {}", self.index + 1, self.source)
    }
}

fn join_failures(failures: &[CandidateFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Hierarchical keyring failures.
#[derive(Error, Debug)]
pub enum KeyringError {
    /// Keyring configuration rejected
    #[error("invalid keyring configuration: {0}")]
    Config(String),

    /// Branch key id supplier failed
    #[error(transparent)]
    Supplier(#[from] SupplierError),

    /// Branch key store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Branch key cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Key derivation or AEAD failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Material lifecycle rule violated
    #[error(transparent)]
    Material(#[from] MaterialError),

    /// Encryption context could not be encoded
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Branch key version is malformed
    #[error(transparent)]
    Version(#[from] VersionError),

    /// EDK ciphertext does not have the exact length this suite requires
    #[error("encrypted data key ciphertext must be {expected} bytes, got {actual}")]
    InvalidCiphertextLength {
        /// Required length
        expected: usize,
        /// Length provided
        actual: usize,
    },

    /// Decryption material already carries a data key
    #[error("decryption material already contains a plaintext data key")]
    DataKeyAlreadyPresent,

    /// No EDK was produced by this keyring for this branch key
    #[error("no encrypted data key matches branch key {branch_key_id}")]
    NoMatchingEncryptedDataKey {
        /// Branch key id the EDKs were filtered on
        branch_key_id: String,
    },

    /// Every matching EDK failed
    #[error("unable to decrypt data key: {}", join_failures(.failures))]
    UnableToDecrypt {
        /// Failure per candidate, in attempt order
        failures: Vec<CandidateFailure>,
    },
}
