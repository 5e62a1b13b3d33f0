//! Bearer-token injection for Microsoft Graph
//!
//! Every outbound Graph call asks the session manager for a credential first,
//! so renewal happens transparently ahead of expiry.
//!
//! # Example
//!
//! ```ignore
//! use provider_onedrive::{graph_url, AuthenticatedHttpClient};
//! use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
//!
//! let client = AuthenticatedHttpClient::new(http_client, manager);
//! let response = client
//!     .execute(HttpRequest::new(HttpMethod::Get, graph_url("/me/drive/root/children")))
//!     .await?;
//! ```

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use core_auth::{AuthSessionManager, CancellationToken};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{OneDriveError, Result};

/// Microsoft Graph API base URL
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Retry-After fallback when Graph throttles without the header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

/// Absolute Graph URL for `path` (leading slash optional).
pub fn graph_url(path: &str) -> String {
    format!("{}/{}", GRAPH_API_BASE, path.trim_start_matches('/'))
}

/// Classifies a Graph response.
///
/// - 401 → `AuthRequired`
/// - 429 / 503 with `Retry-After` → `Throttled`
/// - any other non-2xx → `ApiError`
pub fn check_response(response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }

    match response.status {
        401 => Err(OneDriveError::AuthRequired),
        429 | 503 => {
            let retry_after = response
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
                .and_then(|(_, v)| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(status = response.status, retry_after, "Graph API throttled");
            Err(OneDriveError::Throttled(retry_after))
        }
        status => Err(OneDriveError::ApiError {
            status,
            message: response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string()),
        }),
    }
}

/// Adds `Authorization: Bearer ...` to requests.
#[derive(Clone)]
pub struct GraphAuthorizer {
    manager: Arc<AuthSessionManager>,
}

impl GraphAuthorizer {
    pub fn new(manager: Arc<AuthSessionManager>) -> Self {
        Self { manager }
    }

    /// Returns `request` carrying a currently valid bearer token.
    ///
    /// # Errors
    ///
    /// - `AuthRequired` if the user has to sign in again
    /// - `Auth` for other authentication failures (not initialized, provider
    ///   unreachable, cancelled)
    pub async fn authorize(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpRequest> {
        let credential = self.manager.acquire_token(cancel).await?;
        debug!(url = %request.url, "Authorizing Graph request");
        Ok(request.bearer_token(credential.bearer_token()))
    }

    pub fn manager(&self) -> &Arc<AuthSessionManager> {
        &self.manager
    }
}

/// `HttpClient` that authorizes each request before handing it on.
pub struct AuthenticatedHttpClient {
    inner: Arc<dyn HttpClient>,
    authorizer: GraphAuthorizer,
}

impl AuthenticatedHttpClient {
    pub fn new(inner: Arc<dyn HttpClient>, manager: Arc<AuthSessionManager>) -> Self {
        Self {
            inner,
            authorizer: GraphAuthorizer::new(manager),
        }
    }

    async fn authorize(&self, request: HttpRequest) -> BridgeResult<HttpRequest> {
        self.authorizer
            .authorize(request, &CancellationToken::new())
            .await
            .map_err(|e| match e {
                OneDriveError::Bridge(inner) => inner,
                other => BridgeError::OperationFailed(other.to_string()),
            })
    }
}

#[async_trait]
impl HttpClient for AuthenticatedHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let request = self.authorize(request).await?;
        self.inner.execute(request).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> BridgeResult<HttpResponse> {
        let request = self.authorize(request).await?;
        self.inner.execute_with_retry(request, policy).await
    }
}
