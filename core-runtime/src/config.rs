//! # SDK Configuration Module
//!
//! Builds the configuration the OneDrive SDK runs with: the app registration,
//! authentication options, and the host bridges the core talks through.
//!
//! ## Overview
//!
//! [`AuthOptions`] holds plain settings (scopes, authority, timings, automation
//! switches). [`SdkConfig`] adds the client id and the bridge handles, and is
//! assembled through [`SdkConfigBuilder`], which fails fast when a required
//! capability is missing.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Identity provider and Graph traffic (desktop default: reqwest)
//! - `KeyValueStore` - Credential persistence (desktop default: file under the data dir)
//!
//! ## Optional Dependencies
//!
//! - `Clipboard` - Copies the device code (desktop default with `desktop-clipboard`)
//! - `UrlLauncher` - Opens the verification page (desktop default: system opener)
//! - `EnvironmentExecutor` - Where automation runs (default: inline)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SdkConfig;
//! use std::time::Duration;
//!
//! let config = SdkConfig::builder()
//!     .client_id("00000000-0000-0000-0000-000000000000")
//!     .scopes(["Files.Read", "User.Read"])
//!     .refresh_lead_time(Duration::from_secs(120))
//!     .auto_open_browser(false)
//!     .build()
//!     .expect("valid configuration");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::SdkConfig;
//!
//! // An empty client id is rejected before anything touches the network.
//! let config = SdkConfig::builder()
//!     .client_id("")
//!     .build()
//!     .expect("Should fail - client id is empty");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    automation::{Clipboard, EnvironmentExecutor, InlineExecutor, UrlLauncher},
    http::HttpClient,
    storage::KeyValueStore,
    time::{Clock, SystemClock},
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Microsoft identity platform authority for work, school and personal accounts.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";

/// Graph permissions requested when the host does not override them.
pub const DEFAULT_SCOPES: &[&str] = &["Files.ReadWrite.All", "User.Read"];

/// Renew this long before the provider-reported expiry.
pub const DEFAULT_REFRESH_LEAD_TIME: Duration = Duration::from_secs(5 * 60);

/// Clipboard/browser jobs still pending after this are abandoned.
pub const DEFAULT_AUTOMATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Key the persisted credential blob is stored under.
pub const DEFAULT_TOKEN_CACHE_KEY: &str = "onedrive.token_cache";

/// Environment variable consulted by [`SdkConfigBuilder::from_env`].
pub const CLIENT_ID_ENV: &str = "ONEDRIVE_CLIENT_ID";
pub const AUTHORITY_ENV: &str = "ONEDRIVE_AUTHORITY";
pub const DETAILED_LOGGING_ENV: &str = "ONEDRIVE_DETAILED_LOGGING";

/// Authentication behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOptions {
    /// Graph scopes requested for the bearer token.
    pub scopes: Vec<String>,
    /// Identity provider authority, without the `/oauth2/v2.0` suffix.
    pub authority: String,
    /// A credential expiring within this window is considered stale.
    pub refresh_lead_time: Duration,
    /// Upper bound on each clipboard/browser job.
    pub automation_timeout: Duration,
    pub auto_copy_to_clipboard: bool,
    pub auto_open_browser: bool,
    /// Let `quick_authenticate` fall back to the device-code flow.
    pub interactive_fallback: bool,
    pub token_cache_key: String,
    pub enable_detailed_logging: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            authority: DEFAULT_AUTHORITY.to_string(),
            refresh_lead_time: DEFAULT_REFRESH_LEAD_TIME,
            automation_timeout: DEFAULT_AUTOMATION_TIMEOUT,
            auto_copy_to_clipboard: true,
            auto_open_browser: true,
            interactive_fallback: true,
            token_cache_key: DEFAULT_TOKEN_CACHE_KEY.to_string(),
            enable_detailed_logging: false,
        }
    }
}

impl AuthOptions {
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn with_refresh_lead_time(mut self, lead_time: Duration) -> Self {
        self.refresh_lead_time = lead_time;
        self
    }

    pub fn with_automation_timeout(mut self, timeout: Duration) -> Self {
        self.automation_timeout = timeout;
        self
    }

    pub fn with_auto_copy_to_clipboard(mut self, enabled: bool) -> Self {
        self.auto_copy_to_clipboard = enabled;
        self
    }

    pub fn with_auto_open_browser(mut self, enabled: bool) -> Self {
        self.auto_open_browser = enabled;
        self
    }

    pub fn with_interactive_fallback(mut self, enabled: bool) -> Self {
        self.interactive_fallback = enabled;
        self
    }

    pub fn with_token_cache_key(mut self, key: impl Into<String>) -> Self {
        self.token_cache_key = key.into();
        self
    }

    pub fn with_detailed_logging(mut self, enabled: bool) -> Self {
        self.enable_detailed_logging = enabled;
        self
    }

    /// Validates the options and returns an error if invalid.
    ///
    /// This checks:
    /// - At least one non-blank scope is requested
    /// - The authority is an `https://` URL
    /// - The token cache key is not blank
    /// - The automation timeout is not zero
    pub fn validate(&self) -> Result<()> {
        if self.scopes.is_empty() || self.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::Config(
                "At least one non-empty scope is required".to_string(),
            ));
        }

        let authority = self.authority.trim();
        if !authority.starts_with("https://") || authority.len() <= "https://".len() {
            return Err(Error::Config(format!(
                "Authority must be an https URL, got '{}'",
                self.authority
            )));
        }

        if self.token_cache_key.trim().is_empty() {
            return Err(Error::Config("Token cache key cannot be empty".to_string()));
        }

        if self.automation_timeout.is_zero() {
            return Err(Error::Config(
                "Automation timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Fully assembled SDK configuration.
#[derive(Clone)]
pub struct SdkConfig {
    pub client_id: String,
    pub options: AuthOptions,
    pub http_client: Arc<dyn HttpClient>,
    pub token_store: Arc<dyn KeyValueStore>,
    pub clipboard: Option<Arc<dyn Clipboard>>,
    pub url_launcher: Option<Arc<dyn UrlLauncher>>,
    pub environment_executor: Arc<dyn EnvironmentExecutor>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for SdkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkConfig")
            .field("client_id", &self.client_id)
            .field("options", &self.options)
            .field("has_clipboard", &self.clipboard.is_some())
            .field("has_url_launcher", &self.url_launcher.is_some())
            .finish_non_exhaustive()
    }
}

impl SdkConfig {
    pub fn builder() -> SdkConfigBuilder {
        SdkConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        validate_client_id(&self.client_id)?;
        self.options.validate()
    }
}

/// Rejects blank client ids.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.trim().is_empty() {
        return Err(Error::Config("ClientId cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "An HttpClient implementation is required to reach the identity provider. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject a platform-native adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_token_store() -> Result<Arc<dyn KeyValueStore>> {
    Err(Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "A KeyValueStore implementation is required for credential persistence. \
                 Desktop: enable the 'desktop-shims' feature to use FileKeyValueStore. \
                 Other hosts: inject player preferences, a keychain, or MemoryKeyValueStore."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_token_store() -> Result<Arc<dyn KeyValueStore>> {
    let store = bridge_desktop::FileKeyValueStore::default_location().map_err(|e| {
        Error::Internal(format!("Failed to initialize default KeyValueStore: {}", e))
    })?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_url_launcher() -> Option<Arc<dyn UrlLauncher>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_url_launcher() -> Option<Arc<dyn UrlLauncher>> {
    Some(Arc::new(bridge_desktop::SystemUrlLauncher::new()))
}

#[cfg(not(feature = "desktop-clipboard"))]
fn provide_default_clipboard() -> Option<Arc<dyn Clipboard>> {
    None
}

#[cfg(feature = "desktop-clipboard")]
fn provide_default_clipboard() -> Option<Arc<dyn Clipboard>> {
    Some(Arc::new(bridge_desktop::ArboardClipboard::new()))
}

/// Builder for constructing [`SdkConfig`] instances.
#[derive(Default)]
pub struct SdkConfigBuilder {
    client_id: Option<String>,
    options: AuthOptions,
    http_client: Option<Arc<dyn HttpClient>>,
    token_store: Option<Arc<dyn KeyValueStore>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    url_launcher: Option<Arc<dyn UrlLauncher>>,
    environment_executor: Option<Arc<dyn EnvironmentExecutor>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SdkConfigBuilder {
    /// Starts a builder from `ONEDRIVE_CLIENT_ID`, `ONEDRIVE_AUTHORITY` and
    /// `ONEDRIVE_DETAILED_LOGGING`. Unset variables keep their defaults.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        if let Ok(client_id) = std::env::var(CLIENT_ID_ENV) {
            builder = builder.client_id(client_id);
        }
        if let Ok(authority) = std::env::var(AUTHORITY_ENV) {
            builder = builder.authority(authority);
        }
        if let Ok(flag) = std::env::var(DETAILED_LOGGING_ENV) {
            let enabled = matches!(flag.trim(), "1" | "true" | "TRUE" | "yes");
            builder.options.enable_detailed_logging = enabled;
        }
        builder
    }

    /// Application (client) id from the Azure app registration.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Replaces every authentication option at once.
    pub fn options(mut self, options: AuthOptions) -> Self {
        self.options = options;
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.with_scopes(scopes);
        self
    }

    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.options.authority = authority.into();
        self
    }

    pub fn refresh_lead_time(mut self, lead_time: Duration) -> Self {
        self.options.refresh_lead_time = lead_time;
        self
    }

    pub fn automation_timeout(mut self, timeout: Duration) -> Self {
        self.options.automation_timeout = timeout;
        self
    }

    pub fn auto_copy_to_clipboard(mut self, enabled: bool) -> Self {
        self.options.auto_copy_to_clipboard = enabled;
        self
    }

    pub fn auto_open_browser(mut self, enabled: bool) -> Self {
        self.options.auto_open_browser = enabled;
        self
    }

    pub fn interactive_fallback(mut self, enabled: bool) -> Self {
        self.options.interactive_fallback = enabled;
        self
    }

    pub fn token_cache_key(mut self, key: impl Into<String>) -> Self {
        self.options.token_cache_key = key.into();
        self
    }

    pub fn detailed_logging(mut self, enabled: bool) -> Self {
        self.options.enable_detailed_logging = enabled;
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn token_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn url_launcher(mut self, launcher: Arc<dyn UrlLauncher>) -> Self {
        self.url_launcher = Some(launcher);
        self
    }

    pub fn environment_executor(mut self, executor: Arc<dyn EnvironmentExecutor>) -> Self {
        self.environment_executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the client id is missing/blank or an option is invalid
    /// - `Error::CapabilityMissing` when a required bridge has no default
    pub fn build(self) -> Result<SdkConfig> {
        let client_id = self.client_id.ok_or_else(|| {
            Error::Config("Client id is required. Use .client_id() to set it.".to_string())
        })?;
        validate_client_id(&client_id)?;
        self.options.validate()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let token_store = match self.token_store {
            Some(store) => store,
            None => provide_default_token_store()?,
        };

        let config = SdkConfig {
            client_id: client_id.trim().to_string(),
            options: self.options,
            http_client,
            token_store,
            clipboard: self.clipboard.or_else(provide_default_clipboard),
            url_launcher: self.url_launcher.or_else(provide_default_url_launcher),
            environment_executor: self
                .environment_executor
                .unwrap_or_else(|| Arc::new(InlineExecutor)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        error::Result as BridgeResult,
        http::{HttpRequest, HttpResponse},
        storage::MemoryKeyValueStore,
    };

    struct NoopHttpClient;

    #[async_trait]
    impl HttpClient for NoopHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(bridge_traits::BridgeError::NotAvailable(
                "offline test client".to_string(),
            ))
        }
    }

    fn with_bridges(builder: SdkConfigBuilder) -> SdkConfigBuilder {
        builder
            .http_client(Arc::new(NoopHttpClient))
            .token_store(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn test_auth_options_defaults() {
        let options = AuthOptions::default();

        assert_eq!(options.scopes, vec!["Files.ReadWrite.All", "User.Read"]);
        assert_eq!(options.authority, DEFAULT_AUTHORITY);
        assert_eq!(options.refresh_lead_time, Duration::from_secs(300));
        assert_eq!(options.automation_timeout, Duration::from_secs(5));
        assert!(options.auto_copy_to_clipboard);
        assert!(options.auto_open_browser);
        assert!(options.interactive_fallback);
        assert!(!options.enable_detailed_logging);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_auth_options_validation() {
        let no_scopes = AuthOptions::default().with_scopes(Vec::<String>::new());
        assert!(matches!(no_scopes.validate(), Err(Error::Config(_))));

        let blank_scope = AuthOptions::default().with_scopes(["User.Read", " "]);
        assert!(matches!(blank_scope.validate(), Err(Error::Config(_))));

        let http_authority = AuthOptions::default().with_authority("http://login.example");
        assert!(matches!(http_authority.validate(), Err(Error::Config(_))));

        let no_key = AuthOptions::default().with_token_cache_key("");
        assert!(matches!(no_key.validate(), Err(Error::Config(_))));

        let zero_timeout = AuthOptions::default().with_automation_timeout(Duration::ZERO);
        assert!(matches!(zero_timeout.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_requires_client_id() {
        let result = with_bridges(SdkConfig::builder()).build();
        match result {
            Err(Error::Config(message)) => assert!(message.contains("Client id is required")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_builder_rejects_blank_client_id() {
        let result = with_bridges(SdkConfig::builder().client_id("   ")).build();
        match result {
            Err(Error::Config(message)) => assert_eq!(message, "ClientId cannot be empty"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_builder_with_custom_bridges() {
        let config = with_bridges(SdkConfig::builder())
            .client_id(" 11111111-2222-3333-4444-555555555555 ")
            .scopes(["Files.Read"])
            .refresh_lead_time(Duration::from_secs(60))
            .auto_copy_to_clipboard(false)
            .interactive_fallback(false)
            .token_cache_key("tests.blob")
            .build()
            .unwrap();

        assert_eq!(config.client_id, "11111111-2222-3333-4444-555555555555");
        assert_eq!(config.options.scopes, vec!["Files.Read"]);
        assert_eq!(config.options.refresh_lead_time, Duration::from_secs(60));
        assert!(!config.options.auto_copy_to_clipboard);
        assert!(!config.options.interactive_fallback);
        assert_eq!(config.options.token_cache_key, "tests.blob");
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_reports_missing_store() {
        let result = SdkConfig::builder()
            .client_id("client")
            .http_client(Arc::new(NoopHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "KeyValueStore")
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_debug_output_omits_bridges() {
        let config = with_bridges(SdkConfig::builder().client_id("client"))
            .build()
            .unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("client_id"));
        assert!(debug.contains("has_clipboard"));
    }
}
