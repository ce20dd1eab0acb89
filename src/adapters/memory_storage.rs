//! In-memory credential storage for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::TrustError;
use crate::models::{IdentityServerConfig, PendingBinding, ThreePid};
use crate::traits::storage::CredentialStorage;

#[derive(Debug, Default)]
struct MemoryState {
    identity: IdentityServerConfig,
    scalar_tokens: HashMap<String, String>,
    bindings: HashMap<String, PendingBinding>,
}

/// Credential storage that lives only as long as the session instance.
#[derive(Debug, Default)]
pub struct MemoryCredentialStorage {
    state: Mutex<MemoryState>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStorage for MemoryCredentialStorage {
    fn identity_config(&self) -> Result<IdentityServerConfig, TrustError> {
        Ok(self.lock().identity.clone())
    }

    fn set_identity_config(&self, config: &IdentityServerConfig) -> Result<(), TrustError> {
        self.lock().identity = config.clone();
        Ok(())
    }

    fn scalar_token(&self, api_url: &str) -> Result<Option<String>, TrustError> {
        Ok(self.lock().scalar_tokens.get(api_url).cloned())
    }

    fn set_scalar_token(&self, api_url: &str, token: Option<&str>) -> Result<(), TrustError> {
        let mut state = self.lock();
        match token {
            Some(token) => {
                state
                    .scalar_tokens
                    .insert(api_url.to_string(), token.to_string());
            }
            None => {
                state.scalar_tokens.remove(api_url);
            }
        }
        Ok(())
    }

    fn pending_binding(&self, three_pid: &ThreePid) -> Result<Option<PendingBinding>, TrustError> {
        Ok(self.lock().bindings.get(&three_pid.storage_key()).cloned())
    }

    fn set_pending_binding(
        &self,
        three_pid: &ThreePid,
        binding: &PendingBinding,
    ) -> Result<(), TrustError> {
        self.lock()
            .bindings
            .insert(three_pid.storage_key(), binding.clone());
        Ok(())
    }

    fn delete_pending_binding(&self, three_pid: &ThreePid) -> Result<(), TrustError> {
        self.lock().bindings.remove(&three_pid.storage_key());
        Ok(())
    }
}
