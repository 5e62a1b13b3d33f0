//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the OneDrive SDK:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other crate in the workspace depends on this one for its logging
//! conventions, its configuration types, and the broadcast channel that
//! carries authentication status changes to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{AuthOptions, SdkConfig, SdkConfigBuilder};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, EventStream, SessionEvent};
