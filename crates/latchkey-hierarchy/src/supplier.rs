//! Branch key id selection from the encryption context.

use latchkey_materials::EncryptionContext;
use thiserror::Error;

/// Supplier could not choose a branch key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("branch key id supplier failed: {0}")]
pub struct SupplierError(pub String);

/// Chooses the branch key for a message, typically per tenant.
pub trait BranchKeyIdSupplier: Send + Sync {
    /// Branch key id for `encryption_context`.
    fn branch_key_id(&self, encryption_context: &EncryptionContext)
    -> Result<String, SupplierError>;
}

impl<F> BranchKeyIdSupplier for F
where
    F: Fn(&EncryptionContext) -> Result<String, SupplierError> + Send + Sync,
{
    fn branch_key_id(
        &self,
        encryption_context: &EncryptionContext,
    ) -> Result<String, SupplierError> {
        self(encryption_context)
    }
}
