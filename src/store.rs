//! Durable per-server credential cache.
//!
//! `TokenStore` is the single owner of the session's
//! [`IdentityServerConfig`], scalar tokens, and pending binding records.
//! All mutations go through it; compound read-modify-write sequences are
//! serialized by an internal write lock so that concurrent operations
//! never observe a torn half-updated state.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::error::TrustError;
use crate::models::{IdentityServerConfig, PendingBinding, ThreePid};
use crate::traits::storage::CredentialStorage;

/// Typed facade over the credential storage capability.
pub struct TokenStore {
    storage: Arc<dyn CredentialStorage>,
    // Serializes read-modify-write sequences spanning several storage
    // calls. Individual calls are atomic per the trait contract.
    write_lock: Mutex<()>,
}

impl TokenStore {
    /// Create a store over the given storage capability.
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Current identity server config.
    pub fn identity_config(&self) -> Result<IdentityServerConfig, TrustError> {
        self.storage.identity_config()
    }

    /// Canonical identity server URL, if configured.
    pub fn identity_server_url(&self) -> Result<Option<String>, TrustError> {
        Ok(self.storage.identity_config()?.url)
    }

    /// Cached identity server token, if any.
    pub fn identity_token(&self) -> Result<Option<String>, TrustError> {
        Ok(self.storage.identity_config()?.token)
    }

    /// Replace the whole identity server config.
    pub fn set_identity_config(&self, config: &IdentityServerConfig) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(url = ?config.url, has_token = config.token.is_some(), "storing identity config");
        self.storage.set_identity_config(config)
    }

    /// Set or clear the identity server token, keeping the URL.
    ///
    /// A cleared token is equivalent to "never fetched".
    pub fn set_identity_token(&self, token: Option<&str>) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut config = self.storage.identity_config()?;
        config.token = token.map(str::to_string);
        self.storage.set_identity_config(&config)
    }

    /// Cached scalar token for the integration manager at `api_url`.
    pub fn scalar_token(&self, api_url: &str) -> Result<Option<String>, TrustError> {
        self.storage.scalar_token(api_url)
    }

    /// Set or clear the scalar token for `api_url`.
    pub fn set_scalar_token(&self, api_url: &str, token: Option<&str>) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.set_scalar_token(api_url, token)
    }

    /// Pending binding for a three-pid, if any.
    pub fn pending_binding(
        &self,
        three_pid: &ThreePid,
    ) -> Result<Option<PendingBinding>, TrustError> {
        self.storage.pending_binding(three_pid)
    }

    /// Store a pending binding, replacing any previous record for the
    /// same three-pid.
    pub fn set_pending_binding(
        &self,
        three_pid: &ThreePid,
        binding: &PendingBinding,
    ) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.set_pending_binding(three_pid, binding)
    }

    /// Delete the pending binding for a three-pid, returning the removed
    /// record if one existed.
    pub fn take_pending_binding(
        &self,
        three_pid: &ThreePid,
    ) -> Result<Option<PendingBinding>, TrustError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = self.storage.pending_binding(three_pid)?;
        if existing.is_some() {
            self.storage.delete_pending_binding(three_pid)?;
        }
        Ok(existing)
    }
}
