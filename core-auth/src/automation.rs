//! Device code presentation
//!
//! Once a device code is issued the user has to see it. [`CodePresenter`]
//! copies the user code to the clipboard and opens the verification page,
//! each as a host job bounded by a timeout, then hands the challenge to the
//! caller's callback. Nothing here can fail a sign-in: every failure is
//! logged and swallowed.

use crate::types::DeviceCodeChallenge;
use bridge_traits::automation::{Clipboard, EnvironmentExecutor, EnvironmentJob, UrlLauncher};
use bridge_traits::error::BridgeError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Caller hook fired once per attempt with the issued challenge.
pub type CodeReadyCallback = Arc<dyn Fn(&DeviceCodeChallenge) + Send + Sync>;

/// What happened while presenting one challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationReport {
    pub copied_to_clipboard: bool,
    pub opened_browser: bool,
    pub callback_completed: bool,
}

/// Runs the clipboard/browser conveniences and the caller hook.
pub struct CodePresenter {
    clipboard: Option<Arc<dyn Clipboard>>,
    url_launcher: Option<Arc<dyn UrlLauncher>>,
    executor: Arc<dyn EnvironmentExecutor>,
    timeout: Duration,
    copy_code: bool,
    open_browser: bool,
}

impl CodePresenter {
    pub fn new(executor: Arc<dyn EnvironmentExecutor>, timeout: Duration) -> Self {
        Self {
            clipboard: None,
            url_launcher: None,
            executor,
            timeout,
            copy_code: true,
            open_browser: true,
        }
    }

    pub fn with_clipboard(mut self, clipboard: Option<Arc<dyn Clipboard>>, enabled: bool) -> Self {
        self.clipboard = clipboard;
        self.copy_code = enabled;
        self
    }

    pub fn with_url_launcher(
        mut self,
        url_launcher: Option<Arc<dyn UrlLauncher>>,
        enabled: bool,
    ) -> Self {
        self.url_launcher = url_launcher;
        self.open_browser = enabled;
        self
    }

    /// Presents `challenge` to the user.
    ///
    /// Clipboard and browser jobs run concurrently; each is abandoned after
    /// the configured timeout. The callback runs afterwards, exactly once,
    /// and a panic inside it is contained.
    pub async fn present(
        &self,
        challenge: &DeviceCodeChallenge,
        on_code_ready: Option<&CodeReadyCallback>,
    ) -> PresentationReport {
        let copy = async {
            match (&self.clipboard, self.copy_code) {
                (Some(clipboard), true) => {
                    let clipboard = Arc::clone(clipboard);
                    let code = challenge.user_code.clone();
                    let job: EnvironmentJob = Box::new(move || {
                        if !clipboard.is_available() {
                            return Err(BridgeError::NotAvailable(
                                "clipboard unavailable".to_string(),
                            ));
                        }
                        clipboard.set_text(&code)
                    });
                    self.run("clipboard", job).await
                }
                _ => false,
            }
        };

        let open = async {
            match (&self.url_launcher, self.open_browser) {
                (Some(launcher), true) => {
                    let launcher = Arc::clone(launcher);
                    let url = challenge.launch_uri().to_string();
                    let job: EnvironmentJob = Box::new(move || {
                        if !launcher.is_available() {
                            return Err(BridgeError::NotAvailable(
                                "no browser available".to_string(),
                            ));
                        }
                        launcher.open_url(&url)
                    });
                    self.run("browser", job).await
                }
                _ => false,
            }
        };

        let (copied_to_clipboard, opened_browser) = futures::join!(copy, open);

        let callback_completed = match on_code_ready {
            Some(callback) => {
                match catch_unwind(AssertUnwindSafe(|| (callback.as_ref())(challenge))) {
                    Ok(()) => true,
                    Err(_) => {
                        warn!(attempt_id = %challenge.attempt_id, "Code-ready callback panicked");
                        false
                    }
                }
            }
            None => false,
        };

        PresentationReport {
            copied_to_clipboard,
            opened_browser,
            callback_completed,
        }
    }

    async fn run(&self, name: &'static str, job: EnvironmentJob) -> bool {
        match tokio::time::timeout(self.timeout, self.executor.execute(job)).await {
            Ok(Ok(())) => {
                debug!(job = name, "Automation job completed");
                true
            }
            Ok(Err(e)) => {
                warn!(job = name, error = %e, "Automation job failed");
                false
            }
            Err(_) => {
                warn!(
                    job = name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Automation job timed out; abandoned"
                );
                false
            }
        }
    }
}
