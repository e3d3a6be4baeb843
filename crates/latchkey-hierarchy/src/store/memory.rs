//! In-memory branch key store
//!
//! Keeps branch key records in the same attribute layout a table-backed store
//! would use: one `branch:version:<uuid>` record per version plus a
//! `branch:ACTIVE` record naming the current one. Reads validate that layout
//! before handing out material, so malformed records surface as
//! `InvalidRecord` rather than as wrapping failures later.
//!
//! Branch keys are generated from the environment's RNG, which makes test
//! stores reproducible under a seeded environment.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use latchkey_materials::{BranchKeyMaterial, EncryptionContext, Environment};
use tracing::debug;
use zeroize::Zeroizing;

use super::{
    BRANCH_KEY_ACTIVE_TYPE, BRANCH_KEY_IDENTIFIER_FIELD, BRANCH_KEY_TYPE_PREFIX, BranchKeyStore,
    CUSTOM_ENCRYPTION_CONTEXT_PREFIX, HIERARCHY_VERSION, HIERARCHY_VERSION_FIELD, KEY_VERSION_FIELD,
    KeyStoreInfo, StoreError, TABLE_FIELD, TYPE_FIELD,
};
use crate::version::uuidv4_from_random;

/// Branch key length.
const BRANCH_KEY_LENGTH: usize = 32;

/// In-memory branch key store for testing and simulation
///
/// Keeps one record per branch key version plus an active record per branch
/// key, the same shape a table-backed store persists. Reads validate the
/// record against the request before handing out material, so a store that
/// returns the wrong record is caught here rather than in the keyring.
///
/// All state is shared through `Arc<Mutex<>>`; clones see the same keys.
pub struct MemoryKeyStore<E: Environment> {
    inner: Arc<Mutex<MemoryKeyStoreInner>>,
    info: KeyStoreInfo,
    env: E,
}

#[derive(Clone)]
struct BranchKeyRecord {
    branch_key: Zeroizing<Vec<u8>>,
    attributes: EncryptionContext,
}

struct MemoryKeyStoreInner {
    /// Every version ever created, keyed by `(branch_key_id, version)`
    versions: HashMap<(String, String), BranchKeyRecord>,

    /// Record each branch key currently encrypts with
    active: HashMap<String, BranchKeyRecord>,
}

impl<E: Environment> MemoryKeyStore<E> {
    /// Create an empty store named `logical_key_store_name`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: name is empty
    pub fn new(logical_key_store_name: impl Into<String>, env: E) -> Result<Self, StoreError> {
        let logical_key_store_name = logical_key_store_name.into();
        if logical_key_store_name.is_empty() {
            return Err(StoreError::InvalidInput("logical key store name is empty".to_string()));
        }

        let key_store_id = random_uuid(&env);
        Ok(Self {
            inner: Arc::new(Mutex::new(MemoryKeyStoreInner {
                versions: HashMap::new(),
                active: HashMap::new(),
            })),
            info: KeyStoreInfo { logical_key_store_name, key_store_id },
            env,
        })
    }

    /// Create a branch key with a fresh active version.
    ///
    /// Generates a UUID id when `branch_key_id` is `None`. Entries of
    /// `custom_context` are stored under [`CUSTOM_ENCRYPTION_CONTEXT_PREFIX`]
    /// and come back on every read of this key.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: id or a custom context key is empty
    /// - `AlreadyExists`: a branch key with this id exists
    pub fn create_branch_key(
        &self,
        branch_key_id: Option<&str>,
        custom_context: &EncryptionContext,
    ) -> Result<String, StoreError> {
        let branch_key_id = match branch_key_id {
            Some("") => {
                return Err(StoreError::InvalidInput("branch key id is empty".to_string()));
            },
            Some(id) => id.to_string(),
            None => random_uuid(&self.env),
        };
        if custom_context.keys().any(String::is_empty) {
            return Err(StoreError::InvalidInput("custom context key is empty".to_string()));
        }
        let custom: EncryptionContext = custom_context
            .iter()
            .map(|(k, v)| (format!("{CUSTOM_ENCRYPTION_CONTEXT_PREFIX}{k}"), v.clone()))
            .collect();

        let mut inner = self.lock();
        if inner.active.contains_key(&branch_key_id) {
            return Err(StoreError::AlreadyExists { branch_key_id });
        }

        let version = self.insert_new_version(&mut inner, &branch_key_id, custom);
        debug!(branch_key_id, version, "Created branch key");
        Ok(branch_key_id)
    }

    /// Rotate `branch_key_id` to a fresh version and return it.
    ///
    /// Older versions stay readable so data keys wrapped under them still
    /// decrypt.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no branch key with this id
    pub fn version_branch_key(&self, branch_key_id: &str) -> Result<String, StoreError> {
        let mut inner = self.lock();
        let custom = inner
            .active
            .get(branch_key_id)
            .map(|record| custom_entries(&record.attributes))
            .ok_or_else(|| StoreError::NotFound {
                branch_key_id: branch_key_id.to_string(),
                version: None,
            })?;

        let version = self.insert_new_version(&mut inner, branch_key_id, custom);
        debug!(branch_key_id, version, "Rotated branch key");
        Ok(version)
    }

    /// Number of versions stored for `branch_key_id`.
    pub fn version_count(&self, branch_key_id: &str) -> usize {
        self.lock().versions.keys().filter(|(id, _)| id == branch_key_id).count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryKeyStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_new_version(
        &self,
        inner: &mut MemoryKeyStoreInner,
        branch_key_id: &str,
        custom: EncryptionContext,
    ) -> String {
        let version = random_uuid(&self.env);
        let version_type = format!("{BRANCH_KEY_TYPE_PREFIX}{version}");

        let mut branch_key = Zeroizing::new(vec![0u8; BRANCH_KEY_LENGTH]);
        self.env.random_bytes(&mut branch_key);

        let mut attributes = custom;
        attributes.insert(BRANCH_KEY_IDENTIFIER_FIELD.to_string(), branch_key_id.to_string());
        attributes.insert(TABLE_FIELD.to_string(), self.info.logical_key_store_name.clone());
        attributes.insert(HIERARCHY_VERSION_FIELD.to_string(), HIERARCHY_VERSION.to_string());

        let mut version_attributes = attributes.clone();
        version_attributes.insert(TYPE_FIELD.to_string(), version_type.clone());

        let mut active_attributes = attributes;
        active_attributes.insert(TYPE_FIELD.to_string(), BRANCH_KEY_ACTIVE_TYPE.to_string());
        active_attributes.insert(KEY_VERSION_FIELD.to_string(), version_type);

        inner.versions.insert(
            (branch_key_id.to_string(), version.clone()),
            BranchKeyRecord { branch_key: branch_key.clone(), attributes: version_attributes },
        );
        inner.active.insert(
            branch_key_id.to_string(),
            BranchKeyRecord { branch_key, attributes: active_attributes },
        );

        version
    }

    /// Check `record` against the request and turn it into material.
    fn to_material(
        &self,
        branch_key_id: &str,
        expected_type: Option<&str>,
        record: BranchKeyRecord,
    ) -> Result<BranchKeyMaterial, StoreError> {
        let attribute = |field: &str| record.attributes.get(field).map(String::as_str);
        let invalid = |reason: String| StoreError::InvalidRecord { reason };

        if attribute(BRANCH_KEY_IDENTIFIER_FIELD) != Some(branch_key_id) {
            return Err(invalid(format!("record is not for branch key {branch_key_id}")));
        }
        if attribute(TABLE_FIELD) != Some(self.info.logical_key_store_name.as_str()) {
            return Err(invalid("record belongs to another logical key store".to_string()));
        }

        let version_type = match expected_type {
            Some(expected) => {
                if attribute(TYPE_FIELD) != Some(expected) {
                    return Err(invalid(format!("record type is not {expected}")));
                }
                expected
            },
            None => {
                if attribute(TYPE_FIELD) != Some(BRANCH_KEY_ACTIVE_TYPE) {
                    return Err(invalid(format!("record type is not {BRANCH_KEY_ACTIVE_TYPE}")));
                }
                attribute(KEY_VERSION_FIELD)
                    .ok_or_else(|| invalid("active record has no version".to_string()))?
            },
        };
        let version = version_type
            .strip_prefix(BRANCH_KEY_TYPE_PREFIX)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(format!("malformed version type {version_type}")))?;

        Ok(BranchKeyMaterial::new(
            record.branch_key,
            branch_key_id,
            version,
            custom_entries(&record.attributes),
        ))
    }
}

fn custom_entries(attributes: &EncryptionContext) -> EncryptionContext {
    attributes
        .iter()
        .filter(|(k, _)| k.starts_with(CUSTOM_ENCRYPTION_CONTEXT_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn random_uuid<E: Environment>(env: &E) -> String {
    let mut bytes = [0u8; 16];
    env.random_bytes(&mut bytes);
    uuidv4_from_random(bytes)
}

impl<E: Environment> Clone for MemoryKeyStore<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), info: self.info.clone(), env: self.env.clone() }
    }
}

impl<E: Environment> std::fmt::Debug for MemoryKeyStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryKeyStore")
            .field("info", &self.info)
            .field("branch_keys", &inner.active.len())
            .field("versions", &inner.versions.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Environment> BranchKeyStore for MemoryKeyStore<E> {
    async fn get_active_branch_key(
        &self,
        branch_key_id: &str,
    ) -> Result<BranchKeyMaterial, StoreError> {
        let record = self.lock().active.get(branch_key_id).cloned().ok_or_else(|| {
            StoreError::NotFound { branch_key_id: branch_key_id.to_string(), version: None }
        })?;

        self.to_material(branch_key_id, None, record)
    }

    async fn get_branch_key_version(
        &self,
        branch_key_id: &str,
        branch_key_version: &str,
    ) -> Result<BranchKeyMaterial, StoreError> {
        let key = (branch_key_id.to_string(), branch_key_version.to_string());
        let record = self.lock().versions.get(&key).cloned().ok_or_else(|| {
            StoreError::NotFound {
                branch_key_id: branch_key_id.to_string(),
                version: Some(branch_key_version.to_string()),
            }
        })?;

        let expected_type = format!("{BRANCH_KEY_TYPE_PREFIX}{branch_key_version}");
        self.to_material(branch_key_id, Some(&expected_type), record)
    }

    fn key_store_info(&self) -> KeyStoreInfo {
        self.info.clone()
    }
}
