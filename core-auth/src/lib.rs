//! # Authentication Module
//!
//! Device-code OAuth 2.0 session management for OneDrive.
//!
//! ## Overview
//!
//! This crate owns the token lifecycle: signing in through the device
//! authorization grant, caching and persisting the credential, renewing it
//! ahead of expiry under concurrent access, and gating API calls on a valid
//! token. It does not talk HTTP directly; the identity provider and every
//! host capability arrive through traits.
//!
//! ## Components
//!
//! - [`CredentialCache`]: the current credential and its freshness
//! - [`TokenStore`]: the persisted session blob
//! - [`DeviceCodeFlow`]: interactive sign-in
//! - [`TokenRefresher`]: single-flight renewal
//! - [`AuthSessionManager`]: the session state machine and public surface
//!
//! ## Features
//!
//! - Provider-reported token expiry with a configurable refresh lead time
//! - At most one renewal in flight per session
//! - Cancellable, superseding interactive attempts
//! - Clipboard and browser automation that never fails a sign-in
//! - Authentication status events on the shared event bus

pub mod automation;
pub mod cache;
pub mod device_code;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod provider;
pub mod refresher;
pub mod token_store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use automation::{CodePresenter, CodeReadyCallback, PresentationReport};
pub use cache::{AuthStatusNotifier, CredentialCache};
pub use device_code::DeviceCodeFlow;
pub use error::{AuthError, Result};
pub use manager::{AuthDependencies, AuthSessionManager};
pub use oauth::MicrosoftIdentityProvider;
pub use provider::{ClientRegistration, IdentityProvider, PollOutcome};
pub use refresher::{InteractivePolicy, TokenRefresher};
pub use token_store::{PersistedBlob, TokenStore};
pub use types::{Account, AttemptId, Credential, DeviceCodeChallenge, SessionState, TokenGrant};

pub use tokio_util::sync::CancellationToken;
