//! Key-value persistence for the session token.
//!
//! Values are stored JSON-encoded, so a token is persisted as `"\"abc\""`.
//! The socket client re-reads the token at every connection attempt.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Key under which the bearer token is stored.
pub const TOKEN_KEY: &str = "userToken";

/// A raw string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Writes a value.
    fn set(&self, key: &str, value: String) -> SyncResult<()>;

    /// Removes a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> SyncResult<()>;

    /// Removes every value.
    fn clear(&self) -> SyncResult<()>;
}

/// An in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> SyncResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> SyncResult<()> {
        self.values.lock().clear();
        Ok(())
    }
}

/// A store persisted as a single JSON object on disk.
///
/// Every write rewrites the file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, creating it on first write.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = values.len(), "opened key-value store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> SyncResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn clear(&self) -> SyncResult<()> {
        let mut values = self.values.lock();
        values.clear();
        self.persist(&values)
    }
}

/// Typed access to a [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStorage {
    /// Wraps a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Creates storage backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Stores a JSON-encoded value.
    pub fn set_item<T: Serialize>(&self, key: &str, value: &T) -> SyncResult<()> {
        self.store.set(key, serde_json::to_string(value)?)
    }

    /// Reads and decodes a value.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.store.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| SyncError::Storage(format!("corrupt value for {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Removes a value.
    pub fn remove_item(&self, key: &str) -> SyncResult<()> {
        self.store.remove(key)
    }

    /// Removes every value.
    pub fn clear(&self) -> SyncResult<()> {
        self.store.clear()
    }

    /// Stores the session token.
    pub fn set_user_token(&self, token: &str) -> SyncResult<()> {
        self.set_item(TOKEN_KEY, &token)
    }

    /// Reads the session token.
    pub fn user_token(&self) -> SyncResult<Option<String>> {
        self.get_item(TOKEN_KEY)
    }

    /// Removes the session token.
    pub fn remove_user_token(&self) -> SyncResult<()> {
        self.remove_item(TOKEN_KEY)
    }
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").finish_non_exhaustive()
    }
}
