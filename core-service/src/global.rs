//! Optional process-wide SDK handle.
//!
//! Hosts that cannot thread an [`OneDriveSdk`] through their call graph
//! install one instance at startup and look it up afterwards. Everything else
//! in the workspace works on explicit instances.

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::OneDriveSdk;

static INSTANCE: OnceCell<OneDriveSdk> = OnceCell::new();

/// Installs `sdk` as the process-wide instance. Only the first call wins.
pub fn install(sdk: OneDriveSdk) -> Result<&'static OneDriveSdk> {
    if INSTANCE.set(sdk).is_err() {
        warn!("OneDrive SDK already installed; keeping the existing instance");
        return Err(CoreError::AlreadyInstalled);
    }
    instance()
}

/// The installed instance.
pub fn instance() -> Result<&'static OneDriveSdk> {
    INSTANCE.get().ok_or(CoreError::NotInstalled)
}

pub fn is_installed() -> bool {
    INSTANCE.get().is_some()
}
