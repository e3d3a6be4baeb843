//! Branch key store error types

use thiserror::Error;

/// Errors that can occur in branch key store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Branch key (or the requested version of it) does not exist
    #[error("branch key not found: {branch_key_id}{}", version_suffix(.version.as_deref()))]
    NotFound {
        /// Branch key that was not found
        branch_key_id: String,
        /// Version that was requested, if any
        version: Option<String>,
    },

    /// Branch key already exists
    #[error("branch key already exists: {branch_key_id}")]
    AlreadyExists {
        /// Conflicting branch key id
        branch_key_id: String,
    },

    /// Stored record does not describe the requested branch key
    ///
    /// The store returned something, but its identifier, version, type or
    /// logical table name disagrees with what was asked for.
    #[error("invalid branch key record: {reason}")]
    InvalidRecord {
        /// What did not match
        reason: String,
    },

    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error (network, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

fn version_suffix(version: Option<&str>) -> String {
    version.map(|v| format!(" version {v}")).unwrap_or_default()
}
