//! Workspace umbrella crate.
//!
//! Exposes feature flags that map onto the individual workspace crates so a
//! host can depend on `onedrive-sdk-workspace` alone:
//!
//! - `desktop-shims` (default): reqwest HTTP client, file token store and
//!   system URL launcher as bridge defaults
//! - `desktop-clipboard`: adds the arboard clipboard adapter
//! - `headless`: the SDK without any desktop defaults; the host injects every
//!   bridge

#[cfg(any(feature = "desktop-shims", feature = "desktop-clipboard", feature = "headless"))]
pub use core_service::*;
