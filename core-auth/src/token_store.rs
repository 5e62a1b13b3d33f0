//! Durable Credential Persistence
//!
//! One serialized [`PersistedBlob`] lives under a single well-known key in a
//! host-provided [`KeyValueStore`]. The blob is read once at initialize and
//! rewritten whenever the credential changes.
//!
//! ## Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "account": { "home_account_id": "oid.tid", "username": "adele@contoso.com" },
//!   "credential": { "access_token": "...", "expires_at": "2026-01-01T00:00:00Z", "scopes": ["User.Read"] },
//!   "refresh_token": "..."
//! }
//! ```
//!
//! ## Security
//!
//! - Token values are never logged
//! - Unreadable blobs are deleted best-effort instead of being retried forever

use crate::error::{AuthError, Result};
use crate::types::{Account, Credential, TokenGrant};
use bridge_traits::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Current on-disk format version.
pub const BLOB_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    scopes: BTreeSet<String>,
}

/// Everything needed to resume a session after a restart.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBlob {
    version: u32,
    account: Account,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential: Option<StoredCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl PersistedBlob {
    pub fn from_grant(grant: &TokenGrant) -> Self {
        let credential = &grant.credential;
        Self {
            version: BLOB_VERSION,
            account: credential.account().clone(),
            credential: Some(StoredCredential {
                access_token: credential.bearer_token().to_string(),
                expires_at: credential.expires_at(),
                scopes: credential.scopes().clone(),
            }),
            refresh_token: grant.refresh_token.clone(),
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// The persisted credential, if one was saved.
    pub fn credential(&self) -> Option<Credential> {
        self.credential.as_ref().map(|stored| {
            Credential::new(
                stored.access_token.clone(),
                stored.expires_at,
                self.account.clone(),
                stored.scopes.iter().cloned(),
            )
        })
    }

    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| format!("not JSON: {}", e))?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| "missing version".to_string())?;
        if version != u64::from(BLOB_VERSION) {
            return Err(format!("unsupported version {}", version));
        }
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

impl std::fmt::Debug for PersistedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedBlob")
            .field("version", &self.version)
            .field("account", &self.account.home_account_id)
            .field(
                "expires_at",
                &self.credential.as_ref().map(|c| c.expires_at),
            )
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Reads and writes the persisted blob.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    write_lock: Arc<Mutex<()>>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the blob.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(blob))` if a readable blob exists
    /// - `Ok(None)` if nothing is stored
    /// - `Err(PersistenceCorrupt)` if the stored bytes are unreadable; the
    ///   entry has already been removed best-effort
    /// - `Err(StorageUnavailable)` if the store itself failed
    pub async fn load(&self) -> Result<Option<PersistedBlob>> {
        let data = self.store.read(&self.key).await.map_err(|e| {
            warn!(key = %self.key, error = %e, "Failed to read persisted credentials");
            AuthError::StorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(key = %self.key, "No persisted credentials");
            return Ok(None);
        };

        match PersistedBlob::decode(&data) {
            Ok(blob) => {
                info!(
                    key = %self.key,
                    account = %blob.account.home_account_id,
                    has_refresh_token = blob.refresh_token.is_some(),
                    "Loaded persisted credentials"
                );
                Ok(Some(blob))
            }
            Err(reason) => {
                warn!(key = %self.key, reason = %reason, "Persisted credentials are corrupt");
                if let Err(delete_err) = self.store.remove(&self.key).await {
                    warn!(
                        key = %self.key,
                        error = %delete_err,
                        "Failed to delete corrupt credentials"
                    );
                }
                Err(AuthError::PersistenceCorrupt(reason))
            }
        }
    }

    /// Overwrites the blob. Concurrent saves are serialized.
    pub async fn save(&self, blob: &PersistedBlob) -> Result<()> {
        let json = serde_json::to_vec(blob)
            .map_err(|e| AuthError::Unknown(format!("credential serialization failed: {}", e)))?;

        let _guard = self.write_lock.lock().await;
        self.store.write(&self.key, &json).await.map_err(|e| {
            warn!(key = %self.key, error = %e, "Failed to persist credentials");
            AuthError::StorageUnavailable(e.to_string())
        })?;

        debug!(
            key = %self.key,
            has_refresh_token = blob.refresh_token.is_some(),
            "Credentials persisted"
        );
        Ok(())
    }

    /// Removes the blob. Succeeds if nothing was stored.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(&self.key).await.map_err(|e| {
            warn!(key = %self.key, error = %e, "Failed to delete persisted credentials");
            AuthError::StorageUnavailable(e.to_string())
        })?;
        info!(key = %self.key, "Persisted credentials deleted");
        Ok(())
    }
}
