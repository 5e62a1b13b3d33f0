//! SDK façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, key-value
//! storage, clipboard, URL launcher, environment executor) into the
//! authentication core and the Graph request authorizer. Desktop apps
//! typically enable the `desktop-shims` feature so [`SdkConfigBuilder::build`]
//! falls back to the `bridge-desktop` adapters; other hosts inject their own.
//!
//! ```ignore
//! use core_service::{OneDriveSdk, SdkConfig};
//!
//! let config = SdkConfig::builder()
//!     .client_id("11111111-2222-3333-4444-555555555555")
//!     .build()?;
//! let sdk = OneDriveSdk::new(config).await?;
//! sdk.auth().quick_authenticate().await?;
//! ```

pub mod error;
pub mod global;

pub use error::{CoreError, Result};

pub use core_auth::{AuthSessionManager, CancellationToken, SessionState};
pub use core_runtime::config::{AuthOptions, SdkConfig, SdkConfigBuilder};
pub use core_runtime::events::{AuthEvent, CoreEvent, EventBus, EventStream};
pub use provider_onedrive::{graph_url, AuthenticatedHttpClient, GraphAuthorizer};

use bridge_traits::http::HttpClient;
use core_auth::{AuthDependencies, MicrosoftIdentityProvider};
use core_runtime::logging::{init_logging as init_tracing, LoggingConfig};
use std::sync::Arc;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct OneDriveSdk {
    config: SdkConfig,
    auth: Arc<AuthSessionManager>,
    http_client: Arc<AuthenticatedHttpClient>,
}

impl OneDriveSdk {
    /// Builds the session manager from `config` and initializes it, restoring
    /// any persisted session.
    pub async fn new(config: SdkConfig) -> Result<Self> {
        Self::with_event_bus(config, EventBus::default()).await
    }

    /// Same as [`OneDriveSdk::new`] but publishes on a host-owned bus.
    pub async fn with_event_bus(config: SdkConfig, event_bus: EventBus) -> Result<Self> {
        config.validate()?;

        let provider = Arc::new(MicrosoftIdentityProvider::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.clock),
        ));

        let mut deps = AuthDependencies::new(provider, Arc::clone(&config.token_store))
            .with_executor(Arc::clone(&config.environment_executor))
            .with_clock(Arc::clone(&config.clock))
            .with_event_bus(event_bus);
        if let Some(clipboard) = &config.clipboard {
            deps = deps.with_clipboard(Arc::clone(clipboard));
        }
        if let Some(launcher) = &config.url_launcher {
            deps = deps.with_url_launcher(Arc::clone(launcher));
        }

        let auth = Arc::new(AuthSessionManager::new(deps));
        auth.initialize(&config.client_id, config.options.clone())
            .await?;

        let http_client = Arc::new(AuthenticatedHttpClient::new(
            Arc::clone(&config.http_client),
            Arc::clone(&auth),
        ));

        info!(
            authenticated = auth.is_authenticated(),
            "OneDrive SDK initialized"
        );

        Ok(Self {
            config,
            auth,
            http_client,
        })
    }

    pub fn auth(&self) -> &Arc<AuthSessionManager> {
        &self.auth
    }

    /// HTTP client that attaches a valid bearer token to every request.
    pub fn http_client(&self) -> Arc<dyn HttpClient> {
        self.http_client.clone()
    }

    pub fn authorizer(&self) -> GraphAuthorizer {
        GraphAuthorizer::new(Arc::clone(&self.auth))
    }

    pub fn events(&self) -> &EventBus {
        self.auth.event_bus()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }
}

/// Installs the global tracing subscriber at the verbosity `options` asks for.
///
/// Hosts with their own subscriber skip this.
pub fn init_logging(options: &AuthOptions) -> Result<()> {
    init_tracing(LoggingConfig::detailed(options.enable_detailed_logging))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::storage::MemoryKeyValueStore;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn config(http: MockHttpClient) -> SdkConfig {
        SdkConfig::builder()
            .client_id("11111111-2222-3333-4444-555555555555")
            .interactive_fallback(false)
            .http_client(Arc::new(http))
            .token_store(Arc::new(MemoryKeyValueStore::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_initializes_session() {
        let mut http = MockHttpClient::new();
        http.expect_execute().never();

        let sdk = OneDriveSdk::new(config(http)).await.unwrap();

        assert_eq!(sdk.auth().state(), SessionState::Initialized);
        assert!(!sdk.auth().is_authenticated());
        assert_eq!(
            sdk.auth().client_id().as_deref(),
            Some("11111111-2222-3333-4444-555555555555")
        );
    }

    #[tokio::test]
    async fn test_http_client_refuses_without_session() {
        let mut http = MockHttpClient::new();
        http.expect_execute().never();
        let sdk = OneDriveSdk::new(config(http)).await.unwrap();

        let result = sdk
            .http_client()
            .execute(HttpRequest::new(
                bridge_traits::http::HttpMethod::Get,
                graph_url("/me"),
            ))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_events_share_manager_bus() {
        let sdk = OneDriveSdk::new(config(MockHttpClient::new()))
            .await
            .unwrap();
        let mut stream = sdk.events().stream();

        sdk.auth().sign_out().await.unwrap();

        assert!(stream.try_recv().is_some());
    }
}
