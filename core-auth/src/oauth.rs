//! Microsoft identity platform client
//!
//! Implements [`IdentityProvider`] against the v2.0 endpoints of
//! `login.microsoftonline.com` using the OAuth 2.0 device authorization
//! grant (RFC 8628) and the refresh-token grant.
//!
//! # Endpoints
//!
//! - `{authority}/oauth2/v2.0/devicecode`: issues the user code
//! - `{authority}/oauth2/v2.0/token`: polled until approval, and used for
//!   silent renewal
//!
//! # Security
//!
//! - Token values, device codes and refresh tokens are never logged
//! - Only the public-client flow is used; no client secret is sent
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::MicrosoftIdentityProvider;
//! use core_auth::provider::{ClientRegistration, IdentityProvider};
//! use bridge_traits::time::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example(http_client: Arc<dyn bridge_traits::http::HttpClient>) -> core_auth::Result<()> {
//! let provider = MicrosoftIdentityProvider::new(http_client, Arc::new(SystemClock));
//! let client = ClientRegistration::new(
//!     "00000000-0000-0000-0000-000000000000",
//!     "https://login.microsoftonline.com/common",
//! )?;
//!
//! let challenge = provider
//!     .request_device_code(&client, &["Files.ReadWrite.All".to_string()])
//!     .await?;
//! println!("{}", challenge.instructions());
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::provider::{scope_parameter, ClientRegistration, IdentityProvider, PollOutcome};
use crate::types::{Account, AttemptId, Credential, DeviceCodeChallenge, TokenGrant};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::time::Clock;
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// RFC 8628 grant type.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Polling interval used when the provider omits one.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Per-request transport timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: i64,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Error document returned by both endpoints.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Claims read from the id_token payload. The signature is not verified;
/// the token came straight from the token endpoint over TLS.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Maps an OAuth error code onto the auth taxonomy.
///
/// `authorization_pending` and `slow_down` are handled by the poller before
/// reaching here.
pub fn classify_error(code: &str, description: Option<&str>) -> AuthError {
    let detail = description.unwrap_or(code).to_string();
    match code {
        "expired_token" => AuthError::Expired,
        "invalid_grant" | "interaction_required" | "consent_required" => {
            AuthError::ReauthRequired(detail)
        }
        "invalid_client" | "unauthorized_client" => AuthError::InvalidClient(detail),
        "access_denied" | "authorization_declined" => AuthError::AccessDenied,
        "slow_down" => AuthError::SlowDown,
        _ => AuthError::Unknown(format!("{}: {}", code, detail)),
    }
}

/// Reads account identity out of an id_token.
pub(crate) fn account_from_id_token(id_token: &str) -> Result<Account> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::Unknown("id_token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::Unknown(format!("id_token payload is not base64: {}", e)))?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Unknown(format!("id_token claims unreadable: {}", e)))?;

    let home_account_id = match (&claims.oid, &claims.tid, &claims.sub) {
        (Some(oid), Some(tid), _) => format!("{}.{}", oid, tid),
        (Some(oid), None, _) => oid.clone(),
        (None, _, Some(sub)) => sub.clone(),
        (None, _, None) => {
            return Err(AuthError::Unknown(
                "id_token carries no account identifier".to_string(),
            ))
        }
    };

    Ok(Account {
        home_account_id,
        username: claims.preferred_username.unwrap_or_default(),
        display_name: claims.name,
        tenant_id: claims.tid,
    })
}

/// [`IdentityProvider`] for Microsoft accounts and Entra ID tenants.
pub struct MicrosoftIdentityProvider {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
}

impl MicrosoftIdentityProvider {
    pub fn new(http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http_client,
            clock,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    async fn post_form(&self, url: String, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Post, url)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .form(params)
            .map_err(|e| AuthError::Unknown(format!("Failed to encode request: {}", e)))?;

        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await
            .map_err(|e| {
                warn!(error = %e, "Identity provider unreachable");
                AuthError::ProviderUnavailable(e.to_string())
            })?;

        if response.is_retryable() {
            warn!(
                status = response.status,
                "Identity provider still failing after retries"
            );
            return Err(AuthError::ProviderUnavailable(format!(
                "identity provider returned {}",
                response.status
            )));
        }

        Ok(response)
    }

    fn error_from_response(response: &HttpResponse) -> ErrorResponse {
        response.json::<ErrorResponse>().unwrap_or_else(|_| ErrorResponse {
            error: format!("http_{}", response.status),
            error_description: response.text().ok().filter(|t| !t.trim().is_empty()),
        })
    }

    fn grant_from_response(
        &self,
        response: &HttpResponse,
        requested_scopes: &[String],
        fallback_account: Option<&Account>,
        fallback_refresh_token: Option<&str>,
    ) -> Result<TokenGrant> {
        let token: TokenResponse = response
            .json()
            .map_err(|e| AuthError::Unknown(format!("Failed to parse token response: {}", e)))?;

        let account = match (&token.id_token, fallback_account) {
            (Some(id_token), _) => account_from_id_token(id_token)?,
            (None, Some(account)) => account.clone(),
            (None, None) => {
                return Err(AuthError::Unknown(
                    "token response carried no id_token".to_string(),
                ))
            }
        };

        let scopes: Vec<String> = match &token.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => requested_scopes.to_vec(),
        };

        let credential = Credential::from_lifetime(
            token.access_token,
            self.clock.now(),
            token.expires_in,
            account,
            scopes,
        )?;

        Ok(TokenGrant {
            credential,
            refresh_token: token
                .refresh_token
                .or_else(|| fallback_refresh_token.map(str::to_string)),
        })
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftIdentityProvider {
    #[instrument(skip(self, client, scopes), fields(client_id = %client.client_id))]
    async fn request_device_code(
        &self,
        client: &ClientRegistration,
        scopes: &[String],
    ) -> Result<DeviceCodeChallenge> {
        let scope = scope_parameter(scopes);
        let params = [("client_id", client.client_id.as_str()), ("scope", scope.as_str())];

        debug!("Requesting device code");
        let response = self.post_form(client.endpoint("devicecode"), &params).await?;

        if !response.is_success() {
            let error = Self::error_from_response(&response);
            warn!(status = response.status, error = %error.error, "Device code request rejected");
            return Err(classify_error(&error.error, error.error_description.as_deref()));
        }

        let body: DeviceCodeResponse = response
            .json()
            .map_err(|e| AuthError::Unknown(format!("Failed to parse device code response: {}", e)))?;

        let polling_interval =
            Duration::from_secs(body.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS));
        let challenge = DeviceCodeChallenge {
            attempt_id: AttemptId::new(),
            user_code: body.user_code,
            verification_uri: body.verification_uri,
            verification_uri_complete: body.verification_uri_complete,
            expires_at: self.clock.now() + ChronoDuration::seconds(body.expires_in.max(0)),
            polling_interval,
            message: body.message,
            device_code: body.device_code,
        };

        info!(
            verification_uri = %challenge.verification_uri,
            expires_in = body.expires_in,
            interval_secs = polling_interval.as_secs(),
            "Device code issued"
        );
        Ok(challenge)
    }

    async fn poll_device_code(
        &self,
        client: &ClientRegistration,
        challenge: &DeviceCodeChallenge,
    ) -> Result<PollOutcome> {
        let params = [
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ("client_id", client.client_id.as_str()),
            ("device_code", challenge.device_code.as_str()),
        ];

        let response = self.post_form(client.endpoint("token"), &params).await?;

        if response.is_success() {
            let grant = self.grant_from_response(&response, &[], None, None)?;
            info!(
                account = %grant.credential.account_identifier(),
                expires_at = %grant.credential.expires_at(),
                "Device code approved"
            );
            return Ok(PollOutcome::Approved(grant));
        }

        let error = Self::error_from_response(&response);
        match error.error.as_str() {
            "authorization_pending" => Ok(PollOutcome::Pending),
            "slow_down" => Ok(PollOutcome::SlowDown),
            code => {
                warn!(status = response.status, error = %code, "Device code polling failed");
                Err(classify_error(code, error.error_description.as_deref()))
            }
        }
    }

    #[instrument(skip(self, client, refresh_token, scopes), fields(account = %account.home_account_id))]
    async fn acquire_token_silent(
        &self,
        client: &ClientRegistration,
        account: &Account,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenGrant> {
        let scope = scope_parameter(scopes);
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", client.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        debug!("Refreshing access token");
        let response = self.post_form(client.endpoint("token"), &params).await?;

        if !response.is_success() {
            let error = Self::error_from_response(&response);
            warn!(status = response.status, error = %error.error, "Silent token renewal rejected");
            return Err(classify_error(&error.error, error.error_description.as_deref()));
        }

        let grant =
            self.grant_from_response(&response, scopes, Some(account), Some(refresh_token))?;
        info!(
            expires_at = %grant.credential.expires_at(),
            "Access token refreshed"
        );
        Ok(grant)
    }
}
