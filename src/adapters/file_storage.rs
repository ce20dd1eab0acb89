//! File-backed credential storage.
//!
//! Persists the session's credentials to a JSON file under
//! `~/.trustline/`. A missing or corrupt file loads as defaults; saves
//! create the parent directory if needed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

use crate::error::TrustError;
use crate::models::{IdentityServerConfig, PendingBinding, ThreePid};
use crate::traits::storage::CredentialStorage;

/// The storage directory name.
const STORAGE_DIR: &str = ".trustline";

/// The credentials file name.
const STORAGE_FILE: &str = "credentials.json";

/// Error type for file storage operations.
#[derive(Debug, Error)]
pub enum FileStorageError {
    /// The user's home directory could not be determined
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Filesystem error while writing
    #[error("Failed to write credentials file: {0}")]
    Write(#[from] std::io::Error),

    /// Serialization error while writing
    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<FileStorageError> for TrustError {
    fn from(e: FileStorageError) -> Self {
        TrustError::Storage(e.to_string())
    }
}

/// On-disk shape of the credential store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedCredentials {
    #[serde(default)]
    identity: IdentityServerConfig,
    #[serde(default)]
    scalar_tokens: HashMap<String, String>,
    /// Keyed by [`ThreePid::storage_key`].
    #[serde(default)]
    bindings: HashMap<String, PendingBinding>,
}

/// Credential storage persisted to a JSON file.
pub struct FileCredentialStorage {
    path: PathBuf,
    state: Mutex<PersistedCredentials>,
}

impl FileCredentialStorage {
    /// Create a storage at the default path `~/.trustline/credentials.json`.
    pub fn new() -> Result<Self, FileStorageError> {
        let home = dirs::home_dir().ok_or(FileStorageError::NoHomeDir)?;
        Ok(Self::with_path(home.join(STORAGE_DIR).join(STORAGE_FILE)))
    }

    /// Create a storage backed by an explicit file path.
    pub fn with_path(path: PathBuf) -> Self {
        let state = Self::load(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load persisted credentials, falling back to defaults if the file
    /// is missing or unreadable.
    fn load(path: &PathBuf) -> PersistedCredentials {
        if !path.exists() {
            return PersistedCredentials::default();
        }
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return PersistedCredentials::default(),
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(state) => state,
            Err(e) => {
                warn!("corrupt credentials file, starting fresh: {}", e);
                PersistedCredentials::default()
            }
        }
    }

    fn save(&self, state: &PersistedCredentials) -> Result<(), FileStorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        Ok(())
    }

    fn mutate<F>(&self, f: F) -> Result<(), TrustError>
    where
        F: FnOnce(&mut PersistedCredentials),
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        self.save(&state).map_err(TrustError::from)
    }

    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&PersistedCredentials) -> T,
    {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

impl CredentialStorage for FileCredentialStorage {
    fn identity_config(&self) -> Result<IdentityServerConfig, TrustError> {
        Ok(self.read(|s| s.identity.clone()))
    }

    fn set_identity_config(&self, config: &IdentityServerConfig) -> Result<(), TrustError> {
        self.mutate(|s| s.identity = config.clone())
    }

    fn scalar_token(&self, api_url: &str) -> Result<Option<String>, TrustError> {
        Ok(self.read(|s| s.scalar_tokens.get(api_url).cloned()))
    }

    fn set_scalar_token(&self, api_url: &str, token: Option<&str>) -> Result<(), TrustError> {
        self.mutate(|s| match token {
            Some(token) => {
                s.scalar_tokens.insert(api_url.to_string(), token.to_string());
            }
            None => {
                s.scalar_tokens.remove(api_url);
            }
        })
    }

    fn pending_binding(&self, three_pid: &ThreePid) -> Result<Option<PendingBinding>, TrustError> {
        Ok(self.read(|s| s.bindings.get(&three_pid.storage_key()).cloned()))
    }

    fn set_pending_binding(
        &self,
        three_pid: &ThreePid,
        binding: &PendingBinding,
    ) -> Result<(), TrustError> {
        self.mutate(|s| {
            s.bindings.insert(three_pid.storage_key(), binding.clone());
        })
    }

    fn delete_pending_binding(&self, three_pid: &ThreePid) -> Result<(), TrustError> {
        self.mutate(|s| {
            s.bindings.remove(&three_pid.storage_key());
        })
    }
}
