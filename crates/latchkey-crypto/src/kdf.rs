//! Key derivation in counter mode (NIST SP 800-108) with HMAC-SHA256
//!
//! Each block is `HMAC(ikm, counter || label || 0x00 || salt || L)` where
//! `counter` is a big-endian `u32` starting at 1 and `L` is the output length
//! in bits as a big-endian `u32`. Blocks are concatenated and truncated to the
//! requested length.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{derived_key::DerivedKey, error::CryptoError};

type HmacSha256 = Hmac<Sha256>;

/// Length of the input keying material the KDF accepts.
pub const KDF_IKM_LENGTH: usize = 32;

/// Length of the salt (nonce) the KDF accepts.
pub const KDF_SALT_LENGTH: usize = 16;

/// Length of the derived key.
pub const DERIVED_KEY_LENGTH: usize = 32;

/// Separates the label from the context in the fixed input.
const SEPARATION_INDICATOR: u8 = 0x00;

/// First counter value.
const COUNTER_START: u32 = 1;

/// HMAC-SHA256 output length.
const PRF_OUTPUT_LENGTH: usize = 32;

/// Derive a 32-byte key from `ikm`, `label` and `salt`.
///
/// # Errors
///
/// - `UnsupportedIkmLength`: `ikm` is not 32 bytes
/// - `UnsupportedSaltLength`: `salt` is not 16 bytes
///
/// # Security
///
/// - Deterministic: same inputs always produce the same key
/// - A fresh salt per wrap gives every wrapped data key its own derived key
pub fn kdf_counter_mode(ikm: &[u8], label: &[u8], salt: &[u8]) -> Result<DerivedKey, CryptoError> {
    if ikm.len() != KDF_IKM_LENGTH {
        return Err(CryptoError::UnsupportedIkmLength {
            expected: KDF_IKM_LENGTH,
            actual: ikm.len(),
        });
    }
    if salt.len() != KDF_SALT_LENGTH {
        return Err(CryptoError::UnsupportedSaltLength {
            expected: KDF_SALT_LENGTH,
            actual: salt.len(),
        });
    }

    // label || 0x00 || salt || L
    // Capacity: label + 1 (separator) + 16 (salt) + 4 (length in bits)
    let length_bits = (DERIVED_KEY_LENGTH as u32) * 8;
    let mut fixed_input = Vec::with_capacity(label.len() + 1 + KDF_SALT_LENGTH + 4);
    fixed_input.extend_from_slice(label);
    fixed_input.push(SEPARATION_INDICATOR);
    fixed_input.extend_from_slice(salt);
    fixed_input.extend_from_slice(&length_bits.to_be_bytes());

    let prf = HmacSha256::new_from_slice(ikm)
        .map_err(|e| CryptoError::KeyDerivationFailed { reason: e.to_string() })?;

    let mut output = [0u8; DERIVED_KEY_LENGTH];
    let mut counter = COUNTER_START;
    for chunk in output.chunks_mut(PRF_OUTPUT_LENGTH) {
        let mut mac = prf.clone();
        mac.update(&counter.to_be_bytes());
        mac.update(&fixed_input);
        let block = mac.finalize().into_bytes();

        chunk.copy_from_slice(&block[..chunk.len()]);
        counter += 1;
    }

    Ok(DerivedKey::from_bytes(output))
}
