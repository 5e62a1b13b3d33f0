//! Credential Storage using the OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use keyring::Entry;
use tracing::{debug, error};

const DEFAULT_SERVICE_NAME: &str = "onedrive-sdk";

/// Keyring-backed key-value store
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// Values are base64-encoded because keyring entries hold strings.
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        match e {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                BridgeError::NotAvailable(format!("Keyring unavailable: {}", e))
            }
            other => BridgeError::Storage(format!("Keyring error: {}", other)),
        }
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for KeyringSecureStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    error!(key, error = %e, "Keyring entry is not valid base64");
                    BridgeError::Storage(format!("Failed to decode keyring entry: {}", e))
                })?;
                debug!(key, "Read entry from keyring");
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&STANDARD.encode(value))
            .map_err(Self::map_keyring_error)?;
        debug!(key, bytes = value.len(), "Stored entry in keyring");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(key, "Removed entry from keyring");
                Ok(())
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringSecureStore::new().service_name(), "onedrive-sdk");
        assert_eq!(
            KeyringSecureStore::with_service_name("game-title").service_name(),
            "game-title"
        );
    }

    #[tokio::test]
    async fn test_round_trip_when_keyring_available() {
        // Headless CI machines usually have no secret service.
        let store = KeyringSecureStore::with_service_name("onedrive-sdk-tests");
        let key = "round-trip-blob";

        if let Err(e) = store.write(key, b"{\"version\":1}").await {
            println!("Keyring not available ({}), skipping test", e);
            return;
        }

        match store.read(key).await {
            Ok(Some(value)) => assert_eq!(value, b"{\"version\":1}".to_vec()),
            Ok(None) => println!("Entry written but not readable on this keyring backend"),
            Err(e) => println!("Keyring read failed: {}", e),
        }

        store.remove(key).await.ok();
        store.remove(key).await.ok();
    }
}
