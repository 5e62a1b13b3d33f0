//! Identity provider seam
//!
//! The session core talks to the identity platform only through
//! [`IdentityProvider`]. [`MicrosoftIdentityProvider`](crate::oauth::MicrosoftIdentityProvider)
//! is the shipped implementation; tests substitute fakes.

use crate::error::{AuthError, Result};
use crate::types::{Account, DeviceCodeChallenge, TokenGrant};
use async_trait::async_trait;
use url::Url;

/// Scopes requested on every grant in addition to the configured ones.
pub const RESERVED_SCOPES: &[&str] = &["openid", "profile", "offline_access"];

/// The public-client app registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRegistration {
    pub client_id: String,
    /// Authority base, e.g. `https://login.microsoftonline.com/common`.
    pub authority: Url,
}

impl ClientRegistration {
    /// # Errors
    ///
    /// `InvalidConfiguration` if the client id is blank or the authority is
    /// not an absolute http(s) URL.
    pub fn new(client_id: impl Into<String>, authority: &str) -> Result<Self> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "ClientId cannot be empty".to_string(),
            ));
        }

        let trimmed = authority.trim().trim_end_matches('/');
        let authority = Url::parse(trimmed).map_err(|e| {
            AuthError::InvalidConfiguration(format!("Invalid authority '{}': {}", authority, e))
        })?;
        if !matches!(authority.scheme(), "https" | "http") || authority.host_str().is_none() {
            return Err(AuthError::InvalidConfiguration(format!(
                "Authority must be an http(s) URL, got '{}'",
                authority
            )));
        }

        Ok(Self {
            client_id,
            authority,
        })
    }

    /// `{authority}/oauth2/v2.0/{leaf}`
    pub fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/oauth2/v2.0/{}",
            self.authority.as_str().trim_end_matches('/'),
            leaf
        )
    }
}

/// Configured scopes plus the reserved OpenID scopes, space-separated and
/// without duplicates.
pub fn scope_parameter(scopes: &[String]) -> String {
    let mut all: Vec<&str> = Vec::with_capacity(scopes.len() + RESERVED_SCOPES.len());
    for scope in scopes.iter().map(String::as_str).chain(RESERVED_SCOPES.iter().copied()) {
        if !all.contains(&scope) {
            all.push(scope);
        }
    }
    all.join(" ")
}

/// Result of one device-code poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// `authorization_pending`: the user has not finished yet.
    Pending,
    /// `slow_down`: widen the polling interval.
    SlowDown,
    Approved(TokenGrant),
}

/// Operations the session core needs from an identity platform.
///
/// Implementations map protocol errors onto [`AuthError`]:
/// rejected refresh grants to `ReauthRequired`, an expired device code to
/// `Expired`, a rejected registration to `InvalidClient`, unreachable or
/// overloaded endpoints to `ProviderUnavailable`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn request_device_code(
        &self,
        client: &ClientRegistration,
        scopes: &[String],
    ) -> Result<DeviceCodeChallenge>;

    async fn poll_device_code(
        &self,
        client: &ClientRegistration,
        challenge: &DeviceCodeChallenge,
    ) -> Result<PollOutcome>;

    /// Renews a credential with the refresh token, without user interaction.
    async fn acquire_token_silent(
        &self,
        client: &ClientRegistration,
        account: &Account,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenGrant>;

    /// Drops any provider-side state kept for `account`.
    async fn remove_account(&self, client: &ClientRegistration, account: &Account) -> Result<()> {
        let _ = (client, account);
        Ok(())
    }
}
