//! Error types for materials and the materials-manager seam.

use thiserror::Error;

use crate::suite::{AlgorithmSuiteId, CommitmentPolicy};

/// Boxed error produced by a keyring or backing materials source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Violations of the material lifecycle and suite rules.
///
/// Every operation that returns one of these leaves the material unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterialError {
    /// Suite identifier is not one of the supported suites
    #[error("unknown algorithm suite 0x{id:04x}")]
    UnknownSuite {
        /// Identifier received
        id: u16,
    },

    /// Data key length does not match the suite
    #[error("data key must be {expected} bytes for this suite, got {actual}")]
    InvalidDataKeyLength {
        /// Key length the suite requires
        expected: usize,
        /// Length provided
        actual: usize,
    },

    /// Data key was already set on this material
    #[error("unencrypted data key already set")]
    DataKeyAlreadySet,

    /// Data key was zeroed; material cannot be reused
    #[error("unencrypted data key has been zeroed")]
    DataKeyZeroed,

    /// Operation requires a data key that was never set
    #[error("unencrypted data key has not been set")]
    DataKeyNotSet,

    /// Keyring trace flags do not describe the operation
    #[error("keyring trace for {operation} is missing required flags")]
    InvalidTrace {
        /// Operation that rejected the trace
        operation: &'static str,
    },

    /// Signing or verification key handling does not match the suite
    #[error("signature key mismatch: {reason}")]
    SignatureKey {
        /// What went wrong
        reason: &'static str,
    },

    /// Suite is not allowed under the commitment policy
    #[error("suite {suite} is not allowed under {policy:?}")]
    CommitmentPolicyViolation {
        /// Offending suite
        suite: AlgorithmSuiteId,
        /// Active policy
        policy: CommitmentPolicy,
    },
}

/// Canonical encoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// A field does not fit its `u16` length prefix
    #[error("{field} is {len} bytes, exceeding the u16 length prefix")]
    FieldTooLong {
        /// Field being encoded
        field: &'static str,
        /// Actual length
        len: usize,
    },

    /// Too many encryption context pairs for the `u16` count
    #[error("encryption context has {count} pairs, exceeding u16::MAX")]
    TooManyPairs {
        /// Number of pairs
        count: usize,
    },

    /// Input ended before the structure was complete
    #[error("truncated input: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Offset of the read
        offset: usize,
        /// Bytes needed
        needed: usize,
    },

    /// Bytes remained after the structure was complete
    #[error("{count} trailing bytes after encryption context")]
    TrailingBytes {
        /// Unconsumed byte count
        count: usize,
    },

    /// Keys were not in canonical order or repeated
    #[error("encryption context keys are not strictly ascending at pair {index}")]
    NotCanonical {
        /// Index of the offending pair
        index: usize,
    },

    /// A key or value was not valid UTF-8
    #[error("encryption context contains invalid UTF-8")]
    InvalidUtf8,
}

/// Errors surfaced through the [`crate::MaterialsManager`] interface.
#[derive(Error, Debug)]
pub enum MaterialsError {
    /// Material lifecycle or suite rule violated
    #[error(transparent)]
    Material(#[from] MaterialError),

    /// Encryption context could not be encoded
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Suite requires capabilities this layer does not provide
    #[error("suite {suite} is not supported: {reason}")]
    UnsupportedSuite {
        /// Rejected suite
        suite: AlgorithmSuiteId,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Keyring returned material that cannot be used
    #[error("keyring produced unusable material: {reason}")]
    IncompleteMaterial {
        /// What was missing
        reason: &'static str,
    },

    /// Keyring failed
    #[error("keyring failed: {source}")]
    Keyring {
        /// Underlying keyring error
        #[source]
        source: BoxError,
    },

    /// Materials cache failed
    #[error("materials cache failed: {source}")]
    Cache {
        /// Underlying cache error
        #[source]
        source: BoxError,
    },

    /// Component configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(String),
}
