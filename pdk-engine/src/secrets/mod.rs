// Secret Manager
// Named secret storage behind a narrow contract plus the masker that keeps
// secret values out of any text leaving the process.

pub mod masker;

pub use masker::{global as global_masker, SecretMasker};

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Environment prefix for ad-hoc secrets: `PDK_SECRET_NAME=value`.
const ENV_PREFIX: &str = "PDK_SECRET_";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("secret '{0}' not found")]
    NotFound(String),
}

/// Contract for the encrypted secret store.
///
/// Confidentiality at rest is the store's concern; the engine only ever sees
/// decrypted strings in memory. Implementations must be safe for concurrent
/// use.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, SecretError>;
    fn set(&self, name: &str, value: &str) -> Result<(), SecretError>;
    fn delete(&self, name: &str) -> Result<bool, SecretError>;
    /// Names only, never values.
    fn list(&self) -> Result<Vec<String>, SecretError>;
    fn exists(&self, name: &str) -> Result<bool, SecretError>;
    fn get_all(&self) -> Result<HashMap<String, String>, SecretError>;
}

/// In-memory store used by tests and for CLI/environment-supplied secrets.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Option<String>, SecretError> {
        Ok(self.entries.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.entries.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool, SecretError> {
        Ok(self.entries.lock().remove(name).is_some())
    }

    fn list(&self) -> Result<Vec<String>, SecretError> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool, SecretError> {
        Ok(self.entries.lock().contains_key(name))
    }

    fn get_all(&self) -> Result<HashMap<String, String>, SecretError> {
        Ok(self.entries.lock().clone())
    }
}

/// Front door for secret resolution.
///
/// Every value that passes through here is registered with the global masker
/// before first use, so it can never appear unredacted in output or logs.
pub struct SecretManager {
    store: Box<dyn SecretStore>,
}

impl SecretManager {
    pub fn new(store: Box<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Manager over an in-memory store preloaded from `PDK_SECRET_*`.
    pub fn from_environment() -> Self {
        let store = MemorySecretStore::new();
        for (name, value) in env_secrets() {
            let _ = store.set(&name, &value);
            global_masker().register(&value);
        }
        Self::new(Box::new(store))
    }

    /// Resolve a secret, registering its value with the masker.
    pub fn resolve(&self, name: &str) -> Result<Option<String>, SecretError> {
        let value = self.store.get(name)?;
        if let Some(v) = &value {
            global_masker().register(v);
        }
        Ok(value)
    }

    /// Resolve every secret, registering all values with the masker.
    pub fn resolve_all(&self) -> Result<HashMap<String, String>, SecretError> {
        let all = self.store.get_all()?;
        for value in all.values() {
            global_masker().register(value);
        }
        Ok(all)
    }

    /// Store a secret and register it immediately.
    pub fn put(&self, name: &str, value: &str) -> Result<(), SecretError> {
        global_masker().register(value);
        self.store.set(name, value)
    }

    pub fn store(&self) -> &dyn SecretStore {
        self.store.as_ref()
    }
}

/// Collect `PDK_SECRET_*` environment entries with the prefix stripped.
pub fn env_secrets() -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(k, v)| {
            k.strip_prefix(ENV_PREFIX)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), v))
        })
        .collect()
}
