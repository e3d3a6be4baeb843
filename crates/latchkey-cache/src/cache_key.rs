//! Cache key derivation
//!
//! Keys are SHA-512 digests over the partition, the suite and the encryption
//! context (plus, for decryption, the set of encrypted data keys). Two
//! requests share a cache entry exactly when every input that affects the
//! resulting material is identical.
//!
//! ```text
//! encrypt: SHA-512( SHA-512(partition) || suiteTag || contextHash )
//!          suiteTag = 0x00 | 0x01 || u16BE(suite)
//!
//! decrypt: SHA-512( SHA-512(partition) || u16BE(suite)
//!                   || sorted SHA-512(edk)... || 0x00 * 64 || contextHash )
//! ```

use std::cmp::Ordering;

use base64::{Engine, engine::general_purpose::STANDARD};
use latchkey_materials::{
    AlgorithmSuiteId, EncryptedDataKey, EncryptionContext, SerializationError,
    serialize_encryption_context,
};
use sha2::{Digest, Sha512};

/// SHA-512 digest length
pub const DIGEST_LENGTH: usize = 64;

/// Separates the EDK digests from the context digest in decryption keys.
const EDK_SENTINEL: [u8; DIGEST_LENGTH] = [0u8; DIGEST_LENGTH];

/// Opaque cache key.
///
/// Keys produced by this module are 64-byte digests. `Display` renders
/// base64 for diagnostics.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short hex prefix for log fields.
    pub(crate) fn short(&self) -> String {
        self.0.iter().take(4).map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&STANDARD.encode(&self.0))
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

/// Unsigned lexicographic byte comparison; on a common prefix the shorter
/// input sorts first.
pub fn portable_compare(a: &[u8], b: &[u8]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.cmp(y) {
            Ordering::Equal => {},
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// SHA-512 of the canonical context encoding, without its length prefix.
///
/// The empty context hashes to SHA-512 of the empty string.
pub fn encryption_context_hash(
    context: &EncryptionContext,
) -> Result<[u8; DIGEST_LENGTH], SerializationError> {
    let serialized = serialize_encryption_context(context)?;
    Ok(Sha512::digest(&serialized).into())
}

/// Concatenated SHA-512 digests of each serialized EDK, in portable order.
pub fn encrypted_data_keys_hash(edks: &[EncryptedDataKey]) -> Result<Vec<u8>, SerializationError> {
    let mut digests = edks
        .iter()
        .map(|edk| edk.serialize().map(|bytes| Sha512::digest(&bytes).to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    digests.sort_by(|a, b| portable_compare(a, b));

    Ok(digests.concat())
}

/// Key for encryption material.
///
/// `suite` is `None` when the request left the choice to the manager.
pub fn build_encryption_material_cache_key(
    partition: &[u8],
    suite: Option<AlgorithmSuiteId>,
    context: &EncryptionContext,
) -> Result<CacheKey, SerializationError> {
    let context_hash = encryption_context_hash(context)?;

    let mut hasher = Sha512::new();
    hasher.update(Sha512::digest(partition));
    match suite {
        None => hasher.update([0x00]),
        Some(id) => {
            hasher.update([0x01]);
            hasher.update(id.as_u16().to_be_bytes());
        },
    }
    hasher.update(context_hash);

    Ok(CacheKey(hasher.finalize().to_vec()))
}

/// Key for decryption material.
///
/// Independent of the order of `edks`.
pub fn build_decryption_material_cache_key(
    partition: &[u8],
    suite: AlgorithmSuiteId,
    edks: &[EncryptedDataKey],
    context: &EncryptionContext,
) -> Result<CacheKey, SerializationError> {
    let edk_hashes = encrypted_data_keys_hash(edks)?;
    let context_hash = encryption_context_hash(context)?;

    let mut hasher = Sha512::new();
    hasher.update(Sha512::digest(partition));
    hasher.update(suite.as_u16().to_be_bytes());
    hasher.update(&edk_hashes);
    hasher.update(EDK_SENTINEL);
    hasher.update(context_hash);

    Ok(CacheKey(hasher.finalize().to_vec()))
}
