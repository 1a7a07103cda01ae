//! Secret resolution for source and governance credentials.
//!
//! Provides a trait-based abstraction over secret lookup with two implementations:
//! - `DirectorySecretStore`: one file per secret under a mounted directory, as
//!   projected by a key vault CSI driver.
//! - `InMemorySecretStore`: In-memory store for testing.
//!
//! Requests only ever carry secret *names*; values are resolved at use time and
//! never cached beyond a single run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::SecretError;

/// Trait for secret lookup backends.
pub trait SecretStore: Send + Sync {
    /// Resolve the value of a named secret.
    fn get_secret(&self, name: &str) -> Result<String, SecretError>;

    /// Check whether a secret exists.
    fn has_secret(&self, name: &str) -> bool {
        self.get_secret(name).is_ok()
    }
}

/// Secrets stored as files named after the secret inside one directory.
#[derive(Debug, Clone)]
pub struct DirectorySecretStore {
    root: PathBuf,
}

impl DirectorySecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SecretStore for DirectorySecretStore {
    fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        // Names map to single path components only.
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(SecretError::InvalidName {
                name: name.to_string(),
            });
        }
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(value.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SecretError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(SecretError::Read {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// In-memory secret store for testing.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&self, name: &str, value: &str) {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.insert(name.to_string(), value.to_string());
        }
    }
}

impl SecretStore for InMemorySecretStore {
    fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        let secrets = self.secrets.lock().map_err(|e| SecretError::Read {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
            })
    }
}
