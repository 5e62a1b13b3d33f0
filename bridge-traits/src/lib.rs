//! # Host Bridge Traits
//!
//! Capabilities the authentication core needs from its host.
//!
//! ## Overview
//!
//! This crate defines the contract between the core library and host-specific
//! implementations. Each trait represents a capability that the core requires
//! but that each host provides differently (desktop, game engine, headless
//! service).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP used for the identity provider and Graph
//!
//! ### Persistence
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable storage for the credential blob
//!
//! ### Automation
//! - [`EnvironmentExecutor`](automation::EnvironmentExecutor) - Runs host-affine jobs
//! - [`Clipboard`](automation::Clipboard) - Copies the device code for the user
//! - [`UrlLauncher`](automation::UrlLauncher) - Opens the verification page
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing, and treats automation capabilities as optional:
//!
//! ```ignore
//! let store = config.token_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "KeyValueStore".to_string(),
//!         message: "No token store provided. Desktop: enable desktop-shims. \
//!                   Other hosts: inject a KeyValueStore adapter.".to_string(),
//!     })?;
//! ```
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! across async tasks.

pub mod automation;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use automation::{Clipboard, EnvironmentExecutor, EnvironmentJob, InlineExecutor, UrlLauncher};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::{KeyValueStore, MemoryKeyValueStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
