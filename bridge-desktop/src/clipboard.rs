//! System clipboard via `arboard`

use arboard::Clipboard as SystemClipboard;
use bridge_traits::{
    automation::Clipboard,
    error::{BridgeError, Result},
};
use tracing::debug;

/// Writes text to the OS clipboard.
///
/// A fresh `arboard` handle is opened per call; the handle is not `Send` on
/// every platform and the core writes the clipboard at most once per sign-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArboardClipboard;

impl ArboardClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Clipboard for ArboardClipboard {
    fn is_available(&self) -> bool {
        SystemClipboard::new().is_ok()
    }

    fn set_text(&self, text: &str) -> Result<()> {
        let mut clipboard = SystemClipboard::new()
            .map_err(|e| BridgeError::NotAvailable(format!("Clipboard unavailable: {}", e)))?;
        clipboard
            .set_text(text.to_owned())
            .map_err(|e| BridgeError::OperationFailed(format!("Clipboard write failed: {}", e)))?;
        debug!(chars = text.len(), "Copied text to clipboard");
        Ok(())
    }
}
