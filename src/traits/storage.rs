//! Credential storage capability trait.
//!
//! Storage is a key/value capability: records are addressed by server URL
//! or by identity tuple. Implementations must make each call atomic;
//! compound read-modify-write sequences are serialized by
//! [`crate::store::TokenStore`].

use crate::error::TrustError;
use crate::models::{IdentityServerConfig, PendingBinding, ThreePid};

/// Trait for durable per-server credential storage.
pub trait CredentialStorage: Send + Sync {
    /// The canonical identity server config for this session.
    fn identity_config(&self) -> Result<IdentityServerConfig, TrustError>;

    /// Replace the identity server config.
    fn set_identity_config(&self, config: &IdentityServerConfig) -> Result<(), TrustError>;

    /// The cached service token for the integration manager at `api_url`.
    fn scalar_token(&self, api_url: &str) -> Result<Option<String>, TrustError>;

    /// Set or clear (`None`) the service token for `api_url`.
    fn set_scalar_token(&self, api_url: &str, token: Option<&str>) -> Result<(), TrustError>;

    /// The pending binding for a three-pid, if any.
    fn pending_binding(&self, three_pid: &ThreePid) -> Result<Option<PendingBinding>, TrustError>;

    /// Store the pending binding for a three-pid, replacing any previous
    /// record.
    fn set_pending_binding(
        &self,
        three_pid: &ThreePid,
        binding: &PendingBinding,
    ) -> Result<(), TrustError>;

    /// Delete the pending binding for a three-pid. Deleting a missing
    /// record is a no-op.
    fn delete_pending_binding(&self, three_pid: &ThreePid) -> Result<(), TrustError>;
}
