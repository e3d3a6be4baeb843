//! Data key wrapping under a branch key.
//!
//! ```text
//! ciphertext = salt(16) || iv(12) || version(16) || encryptedKey(keyLen) || tag(16)
//! aad        = "aws-kms-hierarchy" || branchKeyId || version(16) || context
//! wrapKey    = KDF(branchKey, "aws-kms-hierarchy", salt)
//! ```
//!
//! `context` is the canonical encryption context encoding without its length
//! prefix. All functions are pure: salt and IV are supplied by the caller.

use latchkey_crypto::{
    AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, KDF_SALT_LENGTH, kdf_counter_mode, open, seal,
};
use latchkey_materials::{
    AlgorithmSuite, BranchKeyMaterial, EncryptionContext, serialize_encryption_context,
};
use zeroize::Zeroizing;

use crate::{
    PROVIDER_ID,
    error::KeyringError,
    version::{COMPRESSED_VERSION_LENGTH, uuidv4_to_compressed_bytes},
};

/// Salt length.
pub const SALT_LENGTH: usize = KDF_SALT_LENGTH;

/// Bytes surrounding the encrypted key.
const OVERHEAD: usize =
    SALT_LENGTH + AES_GCM_IV_LENGTH + COMPRESSED_VERSION_LENGTH + AES_GCM_TAG_LENGTH;

/// KDF label, shared with the provider id.
const KEY_DERIVATION_LABEL: &[u8] = PROVIDER_ID.as_bytes();

/// Borrowed view of a hierarchy EDK ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiphertextParts<'a> {
    /// KDF salt
    pub salt: &'a [u8; SALT_LENGTH],
    /// AES-GCM IV
    pub iv: &'a [u8; AES_GCM_IV_LENGTH],
    /// Compressed branch key version
    pub branch_key_version: &'a [u8; COMPRESSED_VERSION_LENGTH],
    /// Wrapped data key
    pub encrypted_key: &'a [u8],
    /// AES-GCM tag
    pub auth_tag: &'a [u8; AES_GCM_TAG_LENGTH],
}

/// Exact ciphertext length for `suite`.
pub fn expected_ciphertext_length(suite: &AlgorithmSuite) -> usize {
    OVERHEAD + suite.key_length_bytes()
}

/// Split `ciphertext` into its fields.
///
/// # Errors
///
/// - `InvalidCiphertextLength`: length is not exactly
///   [`expected_ciphertext_length`]; checked before anything else
pub fn destructure_ciphertext<'a>(
    ciphertext: &'a [u8],
    suite: &AlgorithmSuite,
) -> Result<CiphertextParts<'a>, KeyringError> {
    let expected = expected_ciphertext_length(suite);
    let invalid = || KeyringError::InvalidCiphertextLength { expected, actual: ciphertext.len() };
    if ciphertext.len() != expected {
        return Err(invalid());
    }

    let (salt, rest) = ciphertext.split_first_chunk::<SALT_LENGTH>().ok_or_else(invalid)?;
    let (iv, rest) = rest.split_first_chunk::<AES_GCM_IV_LENGTH>().ok_or_else(invalid)?;
    let (branch_key_version, rest) =
        rest.split_first_chunk::<COMPRESSED_VERSION_LENGTH>().ok_or_else(invalid)?;
    let (encrypted_key, auth_tag) =
        rest.split_last_chunk::<AES_GCM_TAG_LENGTH>().ok_or_else(invalid)?;

    debug_assert_eq!(encrypted_key.len(), suite.key_length_bytes());

    Ok(CiphertextParts { salt, iv, branch_key_version, encrypted_key, auth_tag })
}

/// AAD binding the wrapped key to its branch key, version and context.
pub fn wrap_aad(
    branch_key_id: &str,
    branch_key_version: &[u8; COMPRESSED_VERSION_LENGTH],
    encryption_context: &EncryptionContext,
) -> Result<Vec<u8>, KeyringError> {
    let context = serialize_encryption_context(encryption_context)?;

    let mut aad = Vec::with_capacity(
        PROVIDER_ID.len() + branch_key_id.len() + COMPRESSED_VERSION_LENGTH + context.len(),
    );
    aad.extend_from_slice(PROVIDER_ID.as_bytes());
    aad.extend_from_slice(branch_key_id.as_bytes());
    aad.extend_from_slice(branch_key_version);
    aad.extend_from_slice(&context);
    Ok(aad)
}

/// Wrap `plaintext_data_key` under `branch_key`.
///
/// Output is always [`expected_ciphertext_length`] bytes for a key of the
/// suite's length.
///
/// # Security
///
/// - Caller MUST draw `salt` and `iv` fresh from a CSPRNG for every wrap
pub fn wrap_plaintext_data_key(
    plaintext_data_key: &[u8],
    branch_key: &BranchKeyMaterial,
    encryption_context: &EncryptionContext,
    salt: &[u8; SALT_LENGTH],
    iv: &[u8; AES_GCM_IV_LENGTH],
) -> Result<Vec<u8>, KeyringError> {
    let version = uuidv4_to_compressed_bytes(branch_key.branch_key_version())?;
    let derived = kdf_counter_mode(branch_key.branch_key(), KEY_DERIVATION_LABEL, salt)?;
    let aad = wrap_aad(branch_key.branch_key_identifier(), &version, encryption_context)?;

    let sealed = seal(&derived, iv, plaintext_data_key, &aad)?;

    let mut ciphertext = Vec::with_capacity(OVERHEAD + plaintext_data_key.len());
    ciphertext.extend_from_slice(salt);
    ciphertext.extend_from_slice(iv);
    ciphertext.extend_from_slice(&version);
    ciphertext.extend_from_slice(&sealed);

    debug_assert_eq!(ciphertext.len(), OVERHEAD + plaintext_data_key.len());
    Ok(ciphertext)
}

/// Recover the data key from `ciphertext`.
///
/// # Errors
///
/// - `InvalidCiphertextLength`: wrong length for `suite`
/// - `Crypto`: branch key has the wrong length, or authentication failed
pub fn unwrap_encrypted_data_key(
    ciphertext: &[u8],
    branch_key: &BranchKeyMaterial,
    encryption_context: &EncryptionContext,
    suite: &AlgorithmSuite,
) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
    let parts = destructure_ciphertext(ciphertext, suite)?;

    let derived = kdf_counter_mode(branch_key.branch_key(), KEY_DERIVATION_LABEL, parts.salt)?;
    let aad =
        wrap_aad(branch_key.branch_key_identifier(), parts.branch_key_version, encryption_context)?;

    // Everything after the version is `encrypted_key || tag`
    let sealed = &ciphertext[OVERHEAD - AES_GCM_TAG_LENGTH..];
    Ok(open(&derived, parts.iv, sealed, &aad)?)
}

#[cfg(test)]
mod tests {
    use latchkey_materials::AlgorithmSuiteId;

    use super::*;

    const VERSION: &str = "9b2e3c4a-1f0d-4c6b-8a7e-5d3f2b1c0a99";

    fn branch_key() -> BranchKeyMaterial {
        BranchKeyMaterial::new(
            Zeroizing::new(vec![0x11; 32]),
            "branch-key",
            VERSION,
            EncryptionContext::new(),
        )
    }

    fn context() -> EncryptionContext {
        EncryptionContext::from([("tenant".to_string(), "a".to_string())])
    }

    #[test]
    fn wrap_then_unwrap() {
        let suite = AlgorithmSuiteId::Aes256GcmHkdfSha512CommitKey.suite();
        let pdk = [0x42u8; 32];

        let ciphertext =
            wrap_plaintext_data_key(&pdk, &branch_key(), &context(), &[1; 16], &[2; 12]).unwrap();
        assert_eq!(ciphertext.len(), 16 + 12 + 16 + 32 + 16);

        let recovered =
            unwrap_encrypted_data_key(&ciphertext, &branch_key(), &context(), &suite).unwrap();
        assert_eq!(recovered.as_slice(), &pdk);
    }

    #[test]
    fn layout_places_fields_in_order() {
        let suite = AlgorithmSuiteId::Aes128GcmIv12Tag16HkdfSha256.suite();
        let ciphertext =
            wrap_plaintext_data_key(&[0u8; 16], &branch_key(), &context(), &[1; 16], &[2; 12])
                .unwrap();

        let parts = destructure_ciphertext(&ciphertext, &suite).unwrap();
        assert_eq!(parts.salt, &[1u8; 16]);
        assert_eq!(parts.iv, &[2u8; 12]);
        assert_eq!(hex::encode(parts.branch_key_version), "9b2e3c4a1f0d4c6b8a7e5d3f2b1c0a99");
        assert_eq!(parts.encrypted_key.len(), 16);
    }

    #[test]
    fn wrong_length_rejected_before_crypto() {
        let suite = AlgorithmSuiteId::Aes256GcmHkdfSha512CommitKey.suite();

        for len in [0, 59, 91, 93, 200] {
            let ciphertext = vec![0u8; len];
            let result = destructure_ciphertext(&ciphertext, &suite);
            assert!(matches!(
                result,
                Err(KeyringError::InvalidCiphertextLength { expected: 92, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn aad_layout() {
        let version = [0xAB; 16];
        let aad = wrap_aad("bk", &version, &EncryptionContext::new()).unwrap();

        let mut expected = b"aws-kms-hierarchybk".to_vec();
        expected.extend_from_slice(&version);
        assert_eq!(aad, expected);
    }

    #[test]
    fn context_mismatch_fails_authentication() {
        let suite = AlgorithmSuiteId::Aes256GcmHkdfSha512CommitKey.suite();
        let ciphertext =
            wrap_plaintext_data_key(&[0x42; 32], &branch_key(), &context(), &[1; 16], &[2; 12])
                .unwrap();

        let result =
            unwrap_encrypted_data_key(&ciphertext, &branch_key(), &EncryptionContext::new(), &suite);
        assert!(matches!(result, Err(KeyringError::Crypto(_))));
    }

    #[test]
    fn non_uuid_version_cannot_wrap() {
        let branch_key = BranchKeyMaterial::new(
            Zeroizing::new(vec![0x11; 32]),
            "branch-key",
            "version-1",
            EncryptionContext::new(),
        );

        let result =
            wrap_plaintext_data_key(&[0u8; 32], &branch_key, &context(), &[1; 16], &[2; 12]);
        assert!(matches!(result, Err(KeyringError::Version(_))));
    }
}
