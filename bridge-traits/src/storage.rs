//! Persistence Abstractions
//!
//! The core persists a single serialized credential blob under a well-known
//! key. Hosts decide where that blob lives: a keychain, a preferences file,
//! or memory for tests and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{BridgeError, Result};

/// Durable key-value persistence trait
///
/// Abstracts host storage mechanisms:
/// - Desktop: OS keychain or a file under the user's data directory
/// - Game engines: player preferences
/// - Tests: [`MemoryKeyValueStore`]
///
/// # Security Requirements
///
/// Values written by the core contain refresh tokens. Implementations must
/// never log values and should prefer encrypted storage where the host has it.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn forget(store: &dyn KeyValueStore) -> Result<()> {
///     store.remove("onedrive.token_cache").await
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the value stored under `key`
    async fn write(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`; removing a missing key succeeds
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check if a key exists without handing out its value
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }
}

/// In-process store with no durability.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> BridgeError {
    BridgeError::Storage("memory store lock poisoned".to_string())
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryKeyValueStore::new();
        assert!(store.is_empty());

        store.write("blob", b"payload").await.unwrap();
        assert_eq!(store.read("blob").await.unwrap(), Some(b"payload".to_vec()));
        assert!(store.contains("blob").await.unwrap());

        store.write("blob", b"replaced").await.unwrap();
        assert_eq!(store.read("blob").await.unwrap(), Some(b"replaced".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_remove_missing_key_is_ok() {
        let store = MemoryKeyValueStore::new();
        store.remove("missing").await.unwrap();

        store.write("blob", b"payload").await.unwrap();
        store.remove("blob").await.unwrap();
        assert_eq!(store.read("blob").await.unwrap(), None);
    }
}
