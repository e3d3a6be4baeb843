//! Branch key version compression.
//!
//! Versions are hyphenated lowercase UUIDv4 strings. On the wire they travel
//! as the 16 raw UUID bytes.

use uuid::{Uuid, Variant};

use crate::error::VersionError;

/// Compressed version length.
pub const COMPRESSED_VERSION_LENGTH: usize = 16;

/// Hyphenated UUID string length.
const HYPHENATED_LENGTH: usize = 36;

fn is_v4(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 4 && uuid.get_variant() == Variant::RFC4122
}

/// Compress a hyphenated UUIDv4 string to its 16 bytes.
pub fn uuidv4_to_compressed_bytes(
    version: &str,
) -> Result<[u8; COMPRESSED_VERSION_LENGTH], VersionError> {
    let not_v4 = || VersionError::NotUuidV4 { version: version.to_string() };

    // `Uuid::try_parse` also accepts simple, braced and URN forms
    if version.len() != HYPHENATED_LENGTH {
        return Err(not_v4());
    }
    let uuid = Uuid::try_parse(version).map_err(|_| not_v4())?;
    if !is_v4(&uuid) {
        return Err(not_v4());
    }

    Ok(uuid.into_bytes())
}

/// Expand 16 compressed bytes to the lowercase hyphenated UUIDv4 string.
pub fn decompress_bytes_to_uuidv4(bytes: &[u8]) -> Result<String, VersionError> {
    let bytes = <[u8; COMPRESSED_VERSION_LENGTH]>::try_from(bytes)
        .map_err(|_| VersionError::InvalidCompressedLength { len: bytes.len() })?;

    let uuid = Uuid::from_bytes(bytes);
    if !is_v4(&uuid) {
        return Err(VersionError::CompressedNotUuidV4);
    }

    Ok(uuid.hyphenated().to_string())
}

/// Build a UUIDv4 string from 16 random bytes.
pub(crate) fn uuidv4_from_random(bytes: [u8; 16]) -> String {
    uuid::Builder::from_random_bytes(bytes).into_uuid().hyphenated().to_string()
}
