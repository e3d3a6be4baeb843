//! Encryption and decryption materials.
//!
//! Materials carry the plaintext data key through its lifecycle:
//!
//! ```text
//! Unset ──set──► Set ──zero──► Zeroed
//! ```
//!
//! Each transition is one-way. Setting twice, setting after zeroing and
//! zeroing before setting all fail without touching the material. The key
//! buffer is [`Zeroizing`], so a dropped copy wipes itself even when nobody
//! calls [`EncryptionMaterial::zero_unencrypted_data_key`].

use bitflags::bitflags;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    edk::EncryptedDataKey, encryption_context::EncryptionContext, error::MaterialError,
    suite::AlgorithmSuite,
};

bitflags! {
    /// What a keyring did to the data key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TraceFlags: u8 {
        /// Keyring generated the data key
        const GENERATED_DATA_KEY = 0b0000_0001;
        /// Keyring encrypted the data key
        const ENCRYPTED_DATA_KEY = 0b0000_0010;
        /// Keyring decrypted the data key
        const DECRYPTED_DATA_KEY = 0b0000_0100;
        /// Keyring bound the encryption context to the wrapped key
        const SIGNED_ENC_CTX = 0b0000_1000;
        /// Keyring verified the encryption context bound to the wrapped key
        const VERIFIED_ENC_CTX = 0b0001_0000;
    }
}

/// One keyring action recorded on a material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringTrace {
    /// Keyring family (provider id)
    pub key_namespace: String,
    /// Wrapping key name within the family
    pub key_name: String,
    /// Actions performed
    pub flags: TraceFlags,
}

impl KeyringTrace {
    /// Create a trace entry.
    pub fn new(
        key_namespace: impl Into<String>,
        key_name: impl Into<String>,
        flags: TraceFlags,
    ) -> Self {
        Self { key_namespace: key_namespace.into(), key_name: key_name.into(), flags }
    }
}

/// Plaintext data key state.
#[derive(Clone, Default)]
enum DataKeySlot {
    #[default]
    Unset,
    Set(Zeroizing<Vec<u8>>),
    Zeroed,
}

impl DataKeySlot {
    fn check_settable(&self, suite: &AlgorithmSuite, key: &[u8]) -> Result<(), MaterialError> {
        match self {
            Self::Set(_) => return Err(MaterialError::DataKeyAlreadySet),
            Self::Zeroed => return Err(MaterialError::DataKeyZeroed),
            Self::Unset => {},
        }

        if key.len() != suite.key_length_bytes() {
            return Err(MaterialError::InvalidDataKeyLength {
                expected: suite.key_length_bytes(),
                actual: key.len(),
            });
        }

        Ok(())
    }

    fn get(&self) -> Result<&[u8], MaterialError> {
        match self {
            Self::Set(key) => Ok(key.as_slice()),
            Self::Zeroed => Err(MaterialError::DataKeyZeroed),
            Self::Unset => Err(MaterialError::DataKeyNotSet),
        }
    }

    fn zero(&mut self) -> Result<(), MaterialError> {
        match self {
            Self::Unset => Err(MaterialError::DataKeyNotSet),
            Self::Set(key) => {
                key.zeroize();
                *self = Self::Zeroed;
                Ok(())
            },
            Self::Zeroed => Ok(()),
        }
    }

    fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    fn is_zeroed(&self) -> bool {
        matches!(self, Self::Zeroed)
    }
}

impl std::fmt::Debug for DataKeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Set(key) => write!(f, "Set(<{} bytes redacted>)", key.len()),
            Self::Zeroed => f.write_str("Zeroed"),
        }
    }
}

/// Redacted holder for an optional signing or verification key.
#[derive(Clone, Default)]
struct SignatureKey(Option<Zeroizing<Vec<u8>>>);

impl SignatureKey {
    fn set(&mut self, suite: &AlgorithmSuite, key: Vec<u8>) -> Result<(), MaterialError> {
        if !suite.is_signing() {
            return Err(MaterialError::SignatureKey { reason: "suite does not sign messages" });
        }
        if self.0.is_some() {
            return Err(MaterialError::SignatureKey { reason: "key already set" });
        }
        self.0 = Some(Zeroizing::new(key));
        Ok(())
    }

    fn get(&self) -> Option<&[u8]> {
        self.0.as_deref().map(Vec::as_slice)
    }
}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(_) => f.write_str("Some(<redacted>)"),
            None => f.write_str("None"),
        }
    }
}

/// Material produced for one encrypt operation.
#[derive(Debug, Clone)]
pub struct EncryptionMaterial {
    suite: AlgorithmSuite,
    encryption_context: EncryptionContext,
    encrypted_data_keys: Vec<EncryptedDataKey>,
    data_key: DataKeySlot,
    signature_key: SignatureKey,
    keyring_trace: Vec<KeyringTrace>,
}

impl EncryptionMaterial {
    /// Fresh material with no data key.
    pub fn new(suite: AlgorithmSuite, encryption_context: EncryptionContext) -> Self {
        Self {
            suite,
            encryption_context,
            encrypted_data_keys: Vec::new(),
            data_key: DataKeySlot::Unset,
            signature_key: SignatureKey::default(),
            keyring_trace: Vec::new(),
        }
    }

    /// Algorithm suite.
    pub fn suite(&self) -> &AlgorithmSuite {
        &self.suite
    }

    /// Encryption context.
    pub fn encryption_context(&self) -> &EncryptionContext {
        &self.encryption_context
    }

    /// Wrapped copies of the data key, in the order keyrings added them.
    pub fn encrypted_data_keys(&self) -> &[EncryptedDataKey] {
        &self.encrypted_data_keys
    }

    /// Keyring actions, in order.
    pub fn keyring_trace(&self) -> &[KeyringTrace] {
        &self.keyring_trace
    }

    /// Whether a data key is set and not yet zeroed.
    pub fn has_unencrypted_data_key(&self) -> bool {
        self.data_key.is_set()
    }

    /// Whether the data key has been zeroed.
    pub fn is_data_key_zeroed(&self) -> bool {
        self.data_key.is_zeroed()
    }

    /// Plaintext data key.
    pub fn unencrypted_data_key(&self) -> Result<&[u8], MaterialError> {
        self.data_key.get()
    }

    /// Set the plaintext data key.
    ///
    /// # Errors
    ///
    /// - `DataKeyAlreadySet` / `DataKeyZeroed`: key was set before
    /// - `InvalidDataKeyLength`: `key` is not the suite key length
    /// - `InvalidTrace`: `trace` does not record key generation
    pub fn set_unencrypted_data_key(
        &mut self,
        key: Zeroizing<Vec<u8>>,
        trace: KeyringTrace,
    ) -> Result<(), MaterialError> {
        self.data_key.check_settable(&self.suite, &key)?;
        if !trace.flags.contains(TraceFlags::GENERATED_DATA_KEY) {
            return Err(MaterialError::InvalidTrace { operation: "set encryption data key" });
        }

        self.data_key = DataKeySlot::Set(key);
        self.keyring_trace.push(trace);
        Ok(())
    }

    /// Wipe the plaintext data key. Zeroing an already zeroed key is a no-op.
    pub fn zero_unencrypted_data_key(&mut self) -> Result<(), MaterialError> {
        self.data_key.zero()
    }

    /// Append a wrapped copy of the data key.
    ///
    /// Requires the plaintext data key to be present and the trace to record
    /// an encryption.
    pub fn add_encrypted_data_key(
        &mut self,
        edk: EncryptedDataKey,
        trace: KeyringTrace,
    ) -> Result<(), MaterialError> {
        self.data_key.get()?;
        if !trace.flags.contains(TraceFlags::ENCRYPTED_DATA_KEY) {
            return Err(MaterialError::InvalidTrace { operation: "add encrypted data key" });
        }

        self.encrypted_data_keys.push(edk);
        self.keyring_trace.push(trace);
        Ok(())
    }

    /// Set the message signing key. Only valid for signing suites.
    pub fn set_signature_key(&mut self, key: Vec<u8>) -> Result<(), MaterialError> {
        self.signature_key.set(&self.suite, key)
    }

    /// Message signing key, if set.
    pub fn signature_key(&self) -> Option<&[u8]> {
        self.signature_key.get()
    }
}

/// Material produced for one decrypt operation.
#[derive(Debug, Clone)]
pub struct DecryptionMaterial {
    suite: AlgorithmSuite,
    encryption_context: EncryptionContext,
    data_key: DataKeySlot,
    verification_key: SignatureKey,
    keyring_trace: Vec<KeyringTrace>,
}

impl DecryptionMaterial {
    /// Fresh material with no data key.
    pub fn new(suite: AlgorithmSuite, encryption_context: EncryptionContext) -> Self {
        Self {
            suite,
            encryption_context,
            data_key: DataKeySlot::Unset,
            verification_key: SignatureKey::default(),
            keyring_trace: Vec::new(),
        }
    }

    /// Algorithm suite.
    pub fn suite(&self) -> &AlgorithmSuite {
        &self.suite
    }

    /// Encryption context.
    pub fn encryption_context(&self) -> &EncryptionContext {
        &self.encryption_context
    }

    /// Keyring actions, in order.
    pub fn keyring_trace(&self) -> &[KeyringTrace] {
        &self.keyring_trace
    }

    /// Whether a data key is set and not yet zeroed.
    pub fn has_unencrypted_data_key(&self) -> bool {
        self.data_key.is_set()
    }

    /// Whether the data key has been zeroed.
    pub fn is_data_key_zeroed(&self) -> bool {
        self.data_key.is_zeroed()
    }

    /// Plaintext data key.
    pub fn unencrypted_data_key(&self) -> Result<&[u8], MaterialError> {
        self.data_key.get()
    }

    /// Set the plaintext data key recovered by a keyring.
    pub fn set_unencrypted_data_key(
        &mut self,
        key: Zeroizing<Vec<u8>>,
        trace: KeyringTrace,
    ) -> Result<(), MaterialError> {
        self.data_key.check_settable(&self.suite, &key)?;
        if !trace.flags.contains(TraceFlags::DECRYPTED_DATA_KEY) {
            return Err(MaterialError::InvalidTrace { operation: "set decryption data key" });
        }

        self.data_key = DataKeySlot::Set(key);
        self.keyring_trace.push(trace);
        Ok(())
    }

    /// Wipe the plaintext data key. Zeroing an already zeroed key is a no-op.
    pub fn zero_unencrypted_data_key(&mut self) -> Result<(), MaterialError> {
        self.data_key.zero()
    }

    /// Set the signature verification key. Only valid for signing suites.
    pub fn set_verification_key(&mut self, key: Vec<u8>) -> Result<(), MaterialError> {
        self.verification_key.set(&self.suite, key)
    }

    /// Signature verification key, if set.
    pub fn verification_key(&self) -> Option<&[u8]> {
        self.verification_key.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::AlgorithmSuiteId;

    fn suite() -> AlgorithmSuite {
        AlgorithmSuiteId::Aes256GcmIv12Tag16HkdfSha256.suite()
    }

    fn generated() -> KeyringTrace {
        KeyringTrace::new("test", "key", TraceFlags::GENERATED_DATA_KEY)
    }

    fn decrypted() -> KeyringTrace {
        KeyringTrace::new("test", "key", TraceFlags::DECRYPTED_DATA_KEY)
    }

    #[test]
    fn set_then_get_returns_key() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        material.set_unencrypted_data_key(Zeroizing::new(vec![7u8; 32]), generated()).unwrap();

        assert!(material.has_unencrypted_data_key());
        assert_eq!(material.unencrypted_data_key().unwrap(), &[7u8; 32]);
        assert_eq!(material.keyring_trace().len(), 1);
    }

    #[test]
    fn set_twice_fails_without_mutation() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        material.set_unencrypted_data_key(Zeroizing::new(vec![1u8; 32]), generated()).unwrap();

        let result = material.set_unencrypted_data_key(Zeroizing::new(vec![2u8; 32]), generated());

        assert_eq!(result, Err(MaterialError::DataKeyAlreadySet));
        assert_eq!(material.unencrypted_data_key().unwrap(), &[1u8; 32]);
        assert_eq!(material.keyring_trace().len(), 1);
    }

    #[test]
    fn wrong_length_rejected() {
        let mut material = DecryptionMaterial::new(suite(), EncryptionContext::new());
        let result = material.set_unencrypted_data_key(Zeroizing::new(vec![0u8; 16]), decrypted());

        assert_eq!(result, Err(MaterialError::InvalidDataKeyLength { expected: 32, actual: 16 }));
        assert!(!material.has_unencrypted_data_key());
    }

    #[test]
    fn zero_before_set_fails() {
        let mut material = DecryptionMaterial::new(suite(), EncryptionContext::new());
        assert_eq!(material.zero_unencrypted_data_key(), Err(MaterialError::DataKeyNotSet));
    }

    #[test]
    fn set_after_zero_fails() {
        let mut material = DecryptionMaterial::new(suite(), EncryptionContext::new());
        material.set_unencrypted_data_key(Zeroizing::new(vec![3u8; 32]), decrypted()).unwrap();
        material.zero_unencrypted_data_key().unwrap();

        assert!(material.is_data_key_zeroed());
        assert!(!material.has_unencrypted_data_key());
        assert_eq!(material.unencrypted_data_key(), Err(MaterialError::DataKeyZeroed));
        assert_eq!(
            material.set_unencrypted_data_key(Zeroizing::new(vec![3u8; 32]), decrypted()),
            Err(MaterialError::DataKeyZeroed)
        );
    }

    #[test]
    fn zeroing_twice_is_allowed() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        material.set_unencrypted_data_key(Zeroizing::new(vec![3u8; 32]), generated()).unwrap();

        material.zero_unencrypted_data_key().unwrap();
        material.zero_unencrypted_data_key().unwrap();
    }

    #[test]
    fn clone_is_independent_of_original_zeroing() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        material.set_unencrypted_data_key(Zeroizing::new(vec![9u8; 32]), generated()).unwrap();

        let copy = material.clone();
        material.zero_unencrypted_data_key().unwrap();

        assert_eq!(copy.unencrypted_data_key().unwrap(), &[9u8; 32]);
    }

    #[test]
    fn add_edk_requires_data_key() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        let edk = EncryptedDataKey::new("p", b"i".to_vec(), vec![1]);
        let trace = KeyringTrace::new("p", "i", TraceFlags::ENCRYPTED_DATA_KEY);

        assert_eq!(
            material.add_encrypted_data_key(edk.clone(), trace.clone()),
            Err(MaterialError::DataKeyNotSet)
        );

        material.set_unencrypted_data_key(Zeroizing::new(vec![0u8; 32]), generated()).unwrap();
        material.add_encrypted_data_key(edk, trace).unwrap();
        assert_eq!(material.encrypted_data_keys().len(), 1);
    }

    #[test]
    fn trace_flags_are_checked() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        let result = material.set_unencrypted_data_key(Zeroizing::new(vec![0u8; 32]), decrypted());

        assert!(matches!(result, Err(MaterialError::InvalidTrace { .. })));
        assert!(!material.has_unencrypted_data_key());
    }

    #[test]
    fn signature_key_requires_signing_suite() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        assert!(material.set_signature_key(vec![1, 2, 3]).is_err());

        let signing = AlgorithmSuiteId::Aes256GcmIv12Tag16HkdfSha384EcdsaP384.suite();
        let mut material = DecryptionMaterial::new(signing, EncryptionContext::new());
        material.set_verification_key(vec![1, 2, 3]).unwrap();
        assert_eq!(material.verification_key(), Some(&[1u8, 2, 3][..]));
        assert!(material.set_verification_key(vec![4]).is_err());
    }

    #[test]
    fn debug_output_redacts_key() {
        let mut material = EncryptionMaterial::new(suite(), EncryptionContext::new());
        material.set_unencrypted_data_key(Zeroizing::new(vec![0xAB; 32]), generated()).unwrap();

        let debug = format!("{material:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("171"));
    }
}
