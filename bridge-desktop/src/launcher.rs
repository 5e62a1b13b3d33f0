//! System browser launcher

use bridge_traits::{
    automation::UrlLauncher,
    error::{BridgeError, Result},
};
use tracing::debug;

/// Opens URLs in the user's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUrlLauncher;

impl SystemUrlLauncher {
    pub fn new() -> Self {
        Self
    }
}

/// Only http(s) URLs are handed to the shell.
fn ensure_web_url(url: &str) -> Result<()> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(BridgeError::OperationFailed(format!(
            "Refusing to open non-web URL '{}'",
            url
        )))
    }
}

impl UrlLauncher for SystemUrlLauncher {
    fn is_available(&self) -> bool {
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
        }
        #[cfg(any(target_os = "macos", target_os = "windows"))]
        {
            true
        }
    }

    fn open_url(&self, url: &str) -> Result<()> {
        ensure_web_url(url)?;
        open::that(url)
            .map_err(|e| BridgeError::NotAvailable(format!("Failed to open browser: {}", e)))?;
        debug!(url, "Opened URL in system browser");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_web_urls() {
        let launcher = SystemUrlLauncher::new();
        assert!(launcher.open_url("file:///etc/passwd").is_err());
        assert!(launcher.open_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn test_non_web_url_never_reaches_opener() {
        let result = SystemUrlLauncher::new().open_url("ftp://example.com/file");
        assert!(matches!(result, Err(BridgeError::OperationFailed(_))));
    }

    #[test]
    fn test_accepts_verification_url() {
        assert!(ensure_web_url("https://microsoft.com/devicelogin").is_ok());
    }
}
