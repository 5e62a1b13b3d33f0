//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` as files under the user's data directory, or the OS
//!   keychain via `keyring`
//! - `EnvironmentExecutor` as a queue the host drains from its main thread
//! - `UrlLauncher` using the platform opener
//! - `Clipboard` using `arboard`
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//! - `clipboard`: Enable `arboard` clipboard access
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileKeyValueStore, QueuedEnvironmentExecutor, ReqwestHttpClient};
//!
//! let http_client = ReqwestHttpClient::new();
//! let store = FileKeyValueStore::default_location()?;
//! let (executor, mut host_queue) = QueuedEnvironmentExecutor::new();
//!
//! // In the host's frame loop:
//! host_queue.run_pending();
//! ```

mod executor;
mod file_store;
mod http;
mod launcher;

#[cfg(feature = "clipboard")]
mod clipboard;
#[cfg(feature = "secure-store")]
mod secure_store;

pub use executor::{HostQueue, QueuedEnvironmentExecutor};
pub use file_store::FileKeyValueStore;
pub use http::ReqwestHttpClient;
pub use launcher::SystemUrlLauncher;

#[cfg(feature = "clipboard")]
pub use clipboard::ArboardClipboard;
#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
