//! Materials manager and keyring interfaces.
//!
//! A [`MaterialsManager`] turns a request into complete material. A
//! [`Keyring`] wraps or unwraps the data key on material it is handed.
//! [`DefaultMaterialsManager`] composes the two: it builds fresh material from
//! the request, enforces the commitment policy, and delegates key handling to
//! its keyring.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    edk::EncryptedDataKey,
    encryption_context::EncryptionContext,
    error::{MaterialsError, MaterialError},
    material::{DecryptionMaterial, EncryptionMaterial},
    suite::{AlgorithmSuiteId, CommitmentPolicy},
};

/// Request for encryption material.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptionRequest {
    /// Pinned suite, or `None` to let the manager choose
    pub suite: Option<AlgorithmSuiteId>,
    /// Encryption context for the message
    pub encryption_context: EncryptionContext,
    /// Estimated plaintext length, when known
    pub plaintext_length: Option<u64>,
    /// Commitment policy in force
    pub commitment_policy: CommitmentPolicy,
}

/// Request for decryption material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRequest {
    /// Suite the message was encrypted with
    pub suite: AlgorithmSuiteId,
    /// Wrapped data keys from the message header
    pub encrypted_data_keys: Vec<EncryptedDataKey>,
    /// Encryption context from the message header
    pub encryption_context: EncryptionContext,
    /// Commitment policy in force
    pub commitment_policy: CommitmentPolicy,
}

/// Produces complete material for encrypt and decrypt operations.
#[async_trait]
pub trait MaterialsManager: Send + Sync {
    /// Material for encrypting one message.
    async fn get_encryption_materials(
        &self,
        request: EncryptionRequest,
    ) -> Result<EncryptionMaterial, MaterialsError>;

    /// Material for decrypting one message.
    async fn decrypt_materials(
        &self,
        request: DecryptionRequest,
    ) -> Result<DecryptionMaterial, MaterialsError>;
}

/// Wraps and unwraps data keys with one key-management backend.
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Keyring failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Ensure `material` has a data key and add this keyring's wrapped copy.
    async fn on_encrypt(
        &self,
        material: EncryptionMaterial,
    ) -> Result<EncryptionMaterial, Self::Error>;

    /// Recover the data key from one of `encrypted_data_keys`.
    ///
    /// `material` is written only on success; on failure the caller still
    /// holds it exactly as it was passed in.
    async fn on_decrypt(
        &self,
        material: &mut DecryptionMaterial,
        encrypted_data_keys: &[EncryptedDataKey],
    ) -> Result<(), Self::Error>;
}

#[async_trait]
impl<M: MaterialsManager + ?Sized> MaterialsManager for Arc<M> {
    async fn get_encryption_materials(
        &self,
        request: EncryptionRequest,
    ) -> Result<EncryptionMaterial, MaterialsError> {
        (**self).get_encryption_materials(request).await
    }

    async fn decrypt_materials(
        &self,
        request: DecryptionRequest,
    ) -> Result<DecryptionMaterial, MaterialsError> {
        (**self).decrypt_materials(request).await
    }
}

#[async_trait]
impl<K: Keyring + ?Sized> Keyring for Arc<K> {
    type Error = K::Error;

    async fn on_encrypt(
        &self,
        material: EncryptionMaterial,
    ) -> Result<EncryptionMaterial, Self::Error> {
        (**self).on_encrypt(material).await
    }

    async fn on_decrypt(
        &self,
        material: &mut DecryptionMaterial,
        encrypted_data_keys: &[EncryptedDataKey],
    ) -> Result<(), Self::Error> {
        (**self).on_decrypt(material, encrypted_data_keys).await
    }
}

/// Materials manager backed by a single keyring.
///
/// Signing suites are rejected: this layer carries no signature primitives.
#[derive(Debug, Clone)]
pub struct DefaultMaterialsManager<K> {
    keyring: K,
}

impl<K: Keyring> DefaultMaterialsManager<K> {
    /// Create a manager that delegates to `keyring`.
    pub fn new(keyring: K) -> Self {
        Self { keyring }
    }

    /// The wrapped keyring.
    pub fn keyring(&self) -> &K {
        &self.keyring
    }
}

fn reject_signing(suite: AlgorithmSuiteId) -> Result<(), MaterialsError> {
    if suite.suite().is_signing() {
        return Err(MaterialsError::UnsupportedSuite {
            suite,
            reason: "signing suites require a signature provider",
        });
    }
    Ok(())
}

#[async_trait]
impl<K: Keyring> MaterialsManager for DefaultMaterialsManager<K> {
    async fn get_encryption_materials(
        &self,
        request: EncryptionRequest,
    ) -> Result<EncryptionMaterial, MaterialsError> {
        let policy = request.commitment_policy;
        let suite_id = request.suite.unwrap_or_else(|| policy.default_suite());
        let suite = suite_id.suite();

        policy.check_encrypt(&suite)?;
        reject_signing(suite_id)?;

        let material = EncryptionMaterial::new(suite, request.encryption_context);
        let material = self
            .keyring
            .on_encrypt(material)
            .await
            .map_err(|e| MaterialsError::Keyring { source: Box::new(e) })?;

        if !material.has_unencrypted_data_key() {
            return Err(MaterialsError::IncompleteMaterial { reason: "no data key" });
        }
        if material.encrypted_data_keys().is_empty() {
            return Err(MaterialsError::IncompleteMaterial { reason: "no encrypted data keys" });
        }

        debug!(
            suite = %suite_id,
            edks = material.encrypted_data_keys().len(),
            "Produced encryption material"
        );
        Ok(material)
    }

    async fn decrypt_materials(
        &self,
        request: DecryptionRequest,
    ) -> Result<DecryptionMaterial, MaterialsError> {
        let suite = request.suite.suite();

        request.commitment_policy.check_decrypt(&suite)?;
        reject_signing(request.suite)?;

        let mut material = DecryptionMaterial::new(suite, request.encryption_context);
        self.keyring
            .on_decrypt(&mut material, &request.encrypted_data_keys)
            .await
            .map_err(|e| MaterialsError::Keyring { source: Box::new(e) })?;

        if !material.has_unencrypted_data_key() {
            return Err(MaterialError::DataKeyNotSet.into());
        }

        debug!(suite = %request.suite, "Produced decryption material");
        Ok(material)
    }
}
