//! File-backed key-value store
//!
//! Each key is one file in a directory under the user's data dir, which is
//! the desktop counterpart of engine player-preferences storage.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const APP_DIR_NAME: &str = "onedrive-sdk";

/// Stores each value in `<dir>/<sanitized key>.bin`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash never leaves a half-written blob behind. On Unix the files are
/// created readable by the owner only.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the platform data directory
    /// (`~/.local/share/onedrive-sdk`, `%APPDATA%\onedrive-sdk`, ...).
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
            .ok_or_else(|| {
                BridgeError::NotAvailable("No data or home directory for this user".to_string())
            })?;
        Ok(Self::new(base.join(APP_DIR_NAME)))
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(BridgeError::Storage("Key cannot be empty".to_string()));
        }
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Ok(self.dir.join(format!("{}.bin", file_name)))
    }

    async fn write_private(path: &Path, value: &[u8]) -> Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!(key, bytes = bytes.len(), "Read entry from disk");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).await?;

        let staging = path.with_extension("tmp");
        Self::write_private(&staging, value).await?;
        fs::rename(&staging, &path).await?;

        debug!(key, bytes = value.len(), "Wrote entry to disk");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Removed entry from disk");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}
