//! Host Automation Abstractions
//!
//! Side-effecting conveniences the device-code flow can trigger: copying the
//! user code to the clipboard and opening the verification page in a browser.
//! Many hosts only allow these on a specific thread (a UI or engine main
//! thread), so they run as jobs through an [`EnvironmentExecutor`].

use async_trait::async_trait;

use crate::error::Result;

/// A unit of host work. It runs exactly once, on whatever thread the
/// executor chooses.
pub type EnvironmentJob = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Runs jobs in the host's environment and reports their completion.
///
/// The core never assumes a thread model. It only needs to hand a closure
/// over and await the outcome; callers bound that wait with their own
/// timeout and abandon the job if it elapses.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::automation::{EnvironmentExecutor, EnvironmentJob};
///
/// async fn beep(executor: &dyn EnvironmentExecutor) -> Result<()> {
///     let job: EnvironmentJob = Box::new(|| {
///         print!("\x07");
///         Ok(())
///     });
///     executor.execute(job).await
/// }
/// ```
#[async_trait]
pub trait EnvironmentExecutor: Send + Sync {
    /// Run `job` and resolve with its result.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, or `NotAvailable` if the environment
    /// has shut down and the job can no longer run.
    async fn execute(&self, job: EnvironmentJob) -> Result<()>;
}

/// Executes jobs immediately on the calling task.
///
/// Suitable for hosts without thread affinity (CLIs, headless services).
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

#[async_trait]
impl EnvironmentExecutor for InlineExecutor {
    async fn execute(&self, job: EnvironmentJob) -> Result<()> {
        job()
    }
}

/// System clipboard access
pub trait Clipboard: Send + Sync {
    /// Whether the clipboard can be written in this environment.
    fn is_available(&self) -> bool {
        true
    }

    /// Replace the clipboard contents with `text`.
    fn set_text(&self, text: &str) -> Result<()>;
}

/// Opens URLs in the user's browser
pub trait UrlLauncher: Send + Sync {
    /// Whether a browser can be launched in this environment.
    fn is_available(&self) -> bool {
        true
    }

    /// Open `url` externally.
    fn open_url(&self, url: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_inline_executor_runs_job_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        InlineExecutor
            .execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inline_executor_propagates_job_error() {
        let result = InlineExecutor
            .execute(Box::new(|| {
                Err(BridgeError::NotAvailable("clipboard".to_string()))
            }))
            .await;

        assert!(matches!(result, Err(BridgeError::NotAvailable(_))));
    }
}
