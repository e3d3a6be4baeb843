//! Algorithm suites and commitment policy.
//!
//! Every suite identifier maps to exactly one immutable [`AlgorithmSuite`]
//! descriptor. The mapping is a `match` over a closed enum, so an unknown
//! identifier can only enter the system through [`AlgorithmSuiteId::try_from`],
//! which rejects it.

use crate::error::MaterialError;

/// IV length used by every supported suite.
pub const IV_LENGTH: usize = 12;

/// Authentication tag length used by every supported suite.
pub const TAG_LENGTH: usize = 16;

/// Wire identifier of an algorithm suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum AlgorithmSuiteId {
    /// AES-128-GCM, no key derivation.
    Aes128GcmIv12Tag16 = 0x0014,
    /// AES-192-GCM, no key derivation.
    Aes192GcmIv12Tag16 = 0x0046,
    /// AES-256-GCM, no key derivation.
    Aes256GcmIv12Tag16 = 0x0078,
    /// AES-128-GCM with HKDF-SHA256.
    Aes128GcmIv12Tag16HkdfSha256 = 0x0114,
    /// AES-192-GCM with HKDF-SHA256.
    Aes192GcmIv12Tag16HkdfSha256 = 0x0146,
    /// AES-256-GCM with HKDF-SHA256.
    Aes256GcmIv12Tag16HkdfSha256 = 0x0178,
    /// AES-128-GCM with HKDF-SHA256 and ECDSA P-256 signatures.
    Aes128GcmIv12Tag16HkdfSha256EcdsaP256 = 0x0214,
    /// AES-192-GCM with HKDF-SHA384 and ECDSA P-384 signatures.
    Aes192GcmIv12Tag16HkdfSha384EcdsaP384 = 0x0346,
    /// AES-256-GCM with HKDF-SHA384 and ECDSA P-384 signatures.
    Aes256GcmIv12Tag16HkdfSha384EcdsaP384 = 0x0378,
    /// AES-256-GCM with HKDF-SHA512 and key commitment.
    Aes256GcmHkdfSha512CommitKey = 0x0478,
    /// AES-256-GCM with HKDF-SHA512, key commitment and ECDSA P-384.
    Aes256GcmHkdfSha512CommitKeyEcdsaP384 = 0x0578,
}

impl AlgorithmSuiteId {
    /// All supported suites, in ascending identifier order.
    pub const ALL: [Self; 11] = [
        Self::Aes128GcmIv12Tag16,
        Self::Aes192GcmIv12Tag16,
        Self::Aes256GcmIv12Tag16,
        Self::Aes128GcmIv12Tag16HkdfSha256,
        Self::Aes192GcmIv12Tag16HkdfSha256,
        Self::Aes256GcmIv12Tag16HkdfSha256,
        Self::Aes128GcmIv12Tag16HkdfSha256EcdsaP256,
        Self::Aes192GcmIv12Tag16HkdfSha384EcdsaP384,
        Self::Aes256GcmIv12Tag16HkdfSha384EcdsaP384,
        Self::Aes256GcmHkdfSha512CommitKey,
        Self::Aes256GcmHkdfSha512CommitKeyEcdsaP384,
    ];

    /// Numeric wire identifier.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Full descriptor for this suite.
    pub fn suite(self) -> AlgorithmSuite {
        AlgorithmSuite::new(self)
    }
}

impl TryFrom<u16> for AlgorithmSuiteId {
    type Error = MaterialError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_u16() == value)
            .ok_or(MaterialError::UnknownSuite { id: value })
    }
}

impl std::fmt::Display for AlgorithmSuiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}(0x{:04x})", self.as_u16())
    }
}

/// Key derivation applied to the data key before bulk encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivation {
    /// Data key used directly.
    Identity,
    /// HKDF with SHA-256.
    HkdfSha256,
    /// HKDF with SHA-384.
    HkdfSha384,
    /// HKDF with SHA-512.
    HkdfSha512,
}

/// Curve used for message signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCurve {
    /// NIST P-256 with SHA-256.
    P256,
    /// NIST P-384 with SHA-384.
    P384,
}

/// Whether ciphertext produced under a suite commits to its data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commitment {
    /// No key commitment.
    None,
    /// HKDF-derived commitment key.
    Key,
}

/// Immutable algorithm suite descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSuite {
    id: AlgorithmSuiteId,
    key_length_bits: usize,
    kdf: KeyDerivation,
    signature_curve: Option<SignatureCurve>,
    commitment: Commitment,
    cache_safe: bool,
}

impl AlgorithmSuite {
    /// Descriptor for the given identifier.
    pub const fn new(id: AlgorithmSuiteId) -> Self {
        use AlgorithmSuiteId as Id;

        let (key_length_bits, kdf, signature_curve, commitment) = match id {
            Id::Aes128GcmIv12Tag16 => (128, KeyDerivation::Identity, None, Commitment::None),
            Id::Aes192GcmIv12Tag16 => (192, KeyDerivation::Identity, None, Commitment::None),
            Id::Aes256GcmIv12Tag16 => (256, KeyDerivation::Identity, None, Commitment::None),
            Id::Aes128GcmIv12Tag16HkdfSha256 => {
                (128, KeyDerivation::HkdfSha256, None, Commitment::None)
            },
            Id::Aes192GcmIv12Tag16HkdfSha256 => {
                (192, KeyDerivation::HkdfSha256, None, Commitment::None)
            },
            Id::Aes256GcmIv12Tag16HkdfSha256 => {
                (256, KeyDerivation::HkdfSha256, None, Commitment::None)
            },
            Id::Aes128GcmIv12Tag16HkdfSha256EcdsaP256 => {
                (128, KeyDerivation::HkdfSha256, Some(SignatureCurve::P256), Commitment::None)
            },
            Id::Aes192GcmIv12Tag16HkdfSha384EcdsaP384 => {
                (192, KeyDerivation::HkdfSha384, Some(SignatureCurve::P384), Commitment::None)
            },
            Id::Aes256GcmIv12Tag16HkdfSha384EcdsaP384 => {
                (256, KeyDerivation::HkdfSha384, Some(SignatureCurve::P384), Commitment::None)
            },
            Id::Aes256GcmHkdfSha512CommitKey => {
                (256, KeyDerivation::HkdfSha512, None, Commitment::Key)
            },
            Id::Aes256GcmHkdfSha512CommitKeyEcdsaP384 => {
                (256, KeyDerivation::HkdfSha512, Some(SignatureCurve::P384), Commitment::Key)
            },
        };

        // Material from a suite without a KDF would reuse the raw data key as
        // the bulk key across messages.
        let cache_safe = !matches!(kdf, KeyDerivation::Identity);

        Self { id, key_length_bits, kdf, signature_curve, commitment, cache_safe }
    }

    /// Suite identifier.
    pub fn id(&self) -> AlgorithmSuiteId {
        self.id
    }

    /// Data key length in bits.
    pub fn key_length_bits(&self) -> usize {
        self.key_length_bits
    }

    /// Data key length in bytes.
    pub fn key_length_bytes(&self) -> usize {
        self.key_length_bits / 8
    }

    /// IV length in bytes.
    pub fn iv_length(&self) -> usize {
        IV_LENGTH
    }

    /// Tag length in bytes.
    pub fn tag_length(&self) -> usize {
        TAG_LENGTH
    }

    /// Key derivation function.
    pub fn kdf(&self) -> KeyDerivation {
        self.kdf
    }

    /// Signature curve, if the suite signs messages.
    pub fn signature_curve(&self) -> Option<SignatureCurve> {
        self.signature_curve
    }

    /// Whether the suite signs messages.
    pub fn is_signing(&self) -> bool {
        self.signature_curve.is_some()
    }

    /// Key commitment mode.
    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    /// Whether the suite commits to its data key.
    pub fn is_committing(&self) -> bool {
        matches!(self.commitment, Commitment::Key)
    }

    /// Whether material from this suite may be stored in a materials cache.
    pub fn cache_safe(&self) -> bool {
        self.cache_safe
    }
}

impl From<AlgorithmSuiteId> for AlgorithmSuite {
    fn from(id: AlgorithmSuiteId) -> Self {
        Self::new(id)
    }
}

/// Policy governing which suites may be used for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitmentPolicy {
    /// Encrypt with non-committing suites only, decrypt anything.
    ForbidEncryptAllowDecrypt,
    /// Encrypt with committing suites only, decrypt anything.
    RequireEncryptAllowDecrypt,
    /// Encrypt and decrypt with committing suites only.
    #[default]
    RequireEncryptRequireDecrypt,
}

impl CommitmentPolicy {
    /// Suite used for encryption when the request does not pin one.
    pub fn default_suite(self) -> AlgorithmSuiteId {
        match self {
            Self::ForbidEncryptAllowDecrypt => AlgorithmSuiteId::Aes256GcmIv12Tag16HkdfSha256,
            Self::RequireEncryptAllowDecrypt | Self::RequireEncryptRequireDecrypt => {
                AlgorithmSuiteId::Aes256GcmHkdfSha512CommitKey
            },
        }
    }

    /// Check that `suite` may be used to encrypt under this policy.
    pub fn check_encrypt(self, suite: &AlgorithmSuite) -> Result<(), MaterialError> {
        let allowed = match self {
            Self::ForbidEncryptAllowDecrypt => !suite.is_committing(),
            Self::RequireEncryptAllowDecrypt | Self::RequireEncryptRequireDecrypt => {
                suite.is_committing()
            },
        };

        if allowed {
            Ok(())
        } else {
            Err(MaterialError::CommitmentPolicyViolation { suite: suite.id(), policy: self })
        }
    }

    /// Check that `suite` may be used to decrypt under this policy.
    pub fn check_decrypt(self, suite: &AlgorithmSuite) -> Result<(), MaterialError> {
        if matches!(self, Self::RequireEncryptRequireDecrypt) && !suite.is_committing() {
            return Err(MaterialError::CommitmentPolicyViolation {
                suite: suite.id(),
                policy: self,
            });
        }

        Ok(())
    }
}
