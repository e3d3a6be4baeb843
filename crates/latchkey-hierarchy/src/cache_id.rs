//! Branch key cache entry identifiers.
//!
//! ```text
//! encrypt: SHA-384( 0x02 0x00 0x01 0x00 partition 0x00 logicalName 0x00 branchKeyId )
//! decrypt: SHA-384( 0x02 0x00 0x02 0x00 partition 0x00 logicalName 0x00 branchKeyId
//!                   0x00 version )
//! ```
//!
//! The scope byte keeps active-key entries and version entries apart, and the
//! partition and logical store name keep keyrings apart unless they are
//! configured identically.

use latchkey_cache::CacheKey;
use sha2::{Digest, Sha384};

const RESOURCE_ID: u8 = 0x02;
const ENCRYPT_SCOPE: u8 = 0x01;
const DECRYPT_SCOPE: u8 = 0x02;
const NULL: u8 = 0x00;

fn prefix(
    scope: u8,
    partition: &[u8],
    logical_key_store_name: &[u8],
    branch_key_id: &str,
) -> Sha384 {
    let mut hasher = Sha384::new();
    hasher.update([RESOURCE_ID, NULL, scope, NULL]);
    hasher.update(partition);
    hasher.update([NULL]);
    hasher.update(logical_key_store_name);
    hasher.update([NULL]);
    hasher.update(branch_key_id.as_bytes());
    hasher
}

/// Entry id for the active branch key used on encrypt.
pub fn encrypt_cache_entry_id(
    partition: &[u8],
    logical_key_store_name: &[u8],
    branch_key_id: &str,
) -> CacheKey {
    let hasher = prefix(ENCRYPT_SCOPE, partition, logical_key_store_name, branch_key_id);
    CacheKey::from_bytes(hasher.finalize().to_vec())
}

/// Entry id for a specific branch key version used on decrypt.
pub fn decrypt_cache_entry_id(
    partition: &[u8],
    logical_key_store_name: &[u8],
    branch_key_id: &str,
    branch_key_version: &str,
) -> CacheKey {
    let mut hasher = prefix(DECRYPT_SCOPE, partition, logical_key_store_name, branch_key_id);
    hasher.update([NULL]);
    hasher.update(branch_key_version.as_bytes());
    CacheKey::from_bytes(hasher.finalize().to_vec())
}
