//! # Authentication Session Manager
//!
//! The only component the rest of the SDK talks to. It owns the session state
//! machine and wires the cache, token store, refresher and device-code flow
//! together.
//!
//! ## State machine
//!
//! ```text
//!                initialize
//! Uninitialized ───────────> Initialized ──quick_authenticate / authenticate──> Authenticating
//!                               ^   ^                                               │
//!                               │   └────────────── failure / cancel ──────────────┤
//!                               │                                                   v
//!                               └──── reauth required ───────────────────── Authenticated
//!                                                                                   │ sign_out
//!                                                                                   v
//!                                                                               SignedOut
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthDependencies, AuthSessionManager};
//! use core_runtime::config::AuthOptions;
//! use std::sync::Arc;
//! # use core_auth::provider::IdentityProvider;
//! # use bridge_traits::storage::KeyValueStore;
//!
//! # async fn example(
//! #     provider: Arc<dyn IdentityProvider>,
//! #     store: Arc<dyn KeyValueStore>,
//! # ) -> core_auth::Result<()> {
//! let manager = AuthSessionManager::new(AuthDependencies::new(provider, store));
//! manager
//!     .initialize("00000000-0000-0000-0000-000000000000", AuthOptions::default())
//!     .await?;
//!
//! if manager.quick_authenticate().await.is_ok() {
//!     println!("Signed in as {:?}", manager.current_account());
//! }
//! # Ok(())
//! # }
//! ```

use crate::automation::{CodePresenter, CodeReadyCallback};
use crate::cache::CredentialCache;
use crate::device_code::DeviceCodeFlow;
use crate::error::{AuthError, Result};
use crate::provider::{ClientRegistration, IdentityProvider};
use crate::refresher::{InteractivePolicy, TokenRefresher};
use crate::token_store::TokenStore;
use crate::types::{Account, AttemptId, Credential, SessionState};
use bridge_traits::automation::{Clipboard, EnvironmentExecutor, InlineExecutor, UrlLauncher};
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::config::AuthOptions;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, EventStream, SessionEvent};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Collaborators the manager is built from.
#[derive(Clone)]
pub struct AuthDependencies {
    pub provider: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn KeyValueStore>,
    pub clipboard: Option<Arc<dyn Clipboard>>,
    pub url_launcher: Option<Arc<dyn UrlLauncher>>,
    pub executor: Arc<dyn EnvironmentExecutor>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
}

impl AuthDependencies {
    /// Headless defaults: no clipboard or browser, inline executor, system
    /// clock, a fresh event bus.
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            provider,
            store,
            clipboard: None,
            url_launcher: None,
            executor: Arc::new(InlineExecutor),
            clock: Arc::new(SystemClock),
            event_bus: EventBus::default(),
        }
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn with_url_launcher(mut self, url_launcher: Arc<dyn UrlLauncher>) -> Self {
        self.url_launcher = Some(url_launcher);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn EnvironmentExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Everything built by `initialize`.
struct Session {
    client: ClientRegistration,
    options: AuthOptions,
    refresher: TokenRefresher,
    flow: Arc<DeviceCodeFlow>,
}

/// The interactive attempt currently allowed to decide the session state.
struct ActiveAttempt {
    id: AttemptId,
    cancel: CancellationToken,
}

/// Orchestrates sign-in, renewal and sign-out for one app registration.
pub struct AuthSessionManager {
    deps: AuthDependencies,
    cache: Arc<CredentialCache>,
    state: watch::Sender<SessionState>,
    session: RwLock<Option<Arc<Session>>>,
    attempt: StdMutex<Option<ActiveAttempt>>,
    /// Serializes initialize and sign_out.
    lifecycle: Mutex<()>,
}

impl AuthSessionManager {
    pub fn new(deps: AuthDependencies) -> Self {
        let cache = Arc::new(CredentialCache::new(
            Arc::clone(&deps.clock),
            deps.event_bus.clone(),
        ));
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            deps,
            cache,
            state,
            session: RwLock::new(None),
            attempt: StdMutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validates configuration and restores any persisted session.
    ///
    /// Re-initializing with the same client id is a no-op. A different
    /// client id discards the in-memory session and starts over.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for an empty client id, an unusable authority,
    /// or invalid options.
    #[instrument(skip(self, options))]
    pub async fn initialize(&self, client_id: &str, options: AuthOptions) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        options.validate()?;
        let client = ClientRegistration::new(client_id, &options.authority)?;

        if let Some(existing) = self.current_session() {
            if existing.client.client_id == client.client_id {
                debug!("Already initialized for this client id");
                return Ok(());
            }
            info!("Client id changed; discarding previous session");
            self.cancel_attempt();
            self.cache.clear();
        }

        let session = self.build_session(client, options);
        let store = TokenStore::new(
            Arc::clone(&self.deps.store),
            session.options.token_cache_key.clone(),
        );
        match store.load().await {
            Ok(Some(blob)) => session.refresher.restore_from(&blob),
            Ok(None) => debug!("No persisted session"),
            Err(AuthError::PersistenceCorrupt(reason)) => {
                warn!(reason = %reason, "Ignoring corrupt persisted session");
            }
            Err(e) => warn!(error = %e, "Persisted session unavailable; starting empty"),
        }

        *self.write_session() = Some(Arc::new(session));
        self.transition(SessionState::Initialized);
        info!(client_id = %client_id, "Authentication initialized");
        Ok(())
    }

    fn build_session(&self, client: ClientRegistration, options: AuthOptions) -> Session {
        let presenter = Arc::new(
            CodePresenter::new(Arc::clone(&self.deps.executor), options.automation_timeout)
                .with_clipboard(self.deps.clipboard.clone(), options.auto_copy_to_clipboard)
                .with_url_launcher(self.deps.url_launcher.clone(), options.auto_open_browser),
        );
        let flow = Arc::new(DeviceCodeFlow::new(
            Arc::clone(&self.deps.provider),
            client.clone(),
            Arc::clone(&self.deps.clock),
            presenter,
            self.deps.event_bus.clone(),
        ));
        let refresher = TokenRefresher::new(
            Arc::clone(&self.deps.provider),
            client.clone(),
            options.scopes.clone(),
            Arc::clone(&self.cache),
            TokenStore::new(Arc::clone(&self.deps.store), options.token_cache_key.clone()),
            Arc::clone(&flow),
            self.deps.event_bus.clone(),
            // Interactive fallback is driven here so it can be tracked as an attempt.
            InteractivePolicy::Disallowed,
        );
        Session {
            client,
            options,
            refresher,
            flow,
        }
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Authenticates without user interaction if possible.
    ///
    /// Succeeds immediately, without I/O, when already authenticated with a
    /// fresh credential. Otherwise renews silently; if that requires a new
    /// sign-in and `interactive_fallback` is enabled, runs the device-code
    /// flow.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before `initialize`
    /// - `AuthenticationInProgress` if the fallback is needed while another
    ///   interactive attempt is running
    /// - `ReauthRequired` if interaction is needed and fallback is disabled
    #[instrument(skip(self))]
    pub async fn quick_authenticate(&self) -> Result<()> {
        let session = self.require_session()?;
        let lead_time = session.options.refresh_lead_time;

        if self.state().is_authenticated() && self.cache.is_fresh(lead_time) {
            debug!("Already authenticated with a fresh credential");
            return Ok(());
        }

        match session
            .refresher
            .ensure_valid(lead_time, &CancellationToken::new())
            .await
        {
            Ok(credential) => {
                self.mark_authenticated(&credential);
                Ok(())
            }
            Err(AuthError::ReauthRequired(reason)) if session.options.interactive_fallback => {
                info!(reason = %reason, "Silent sign-in not possible; falling back to device code");
                self.run_interactive(&session, None, CancellationToken::new(), false)
                    .await
            }
            Err(e) => {
                self.demote_if_reauth(&e);
                Err(e)
            }
        }
    }

    /// Runs the device-code flow.
    ///
    /// A newer call supersedes (cancels) an attempt still in progress; only
    /// the latest attempt decides the final state.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before `initialize`
    /// - `Cancelled` if `cancel` fired or a newer attempt superseded this one
    /// - `Expired`, `AccessDenied`, `InvalidClient`, `ProviderUnavailable`
    #[instrument(skip(self, on_code_ready, cancel))]
    pub async fn authenticate(
        &self,
        on_code_ready: Option<CodeReadyCallback>,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        let session = self.require_session()?;
        self.run_interactive(&session, on_code_ready, cancel.unwrap_or_default(), true)
            .await
    }

    async fn run_interactive(
        &self,
        session: &Session,
        on_code_ready: Option<CodeReadyCallback>,
        caller_cancel: CancellationToken,
        supersede: bool,
    ) -> Result<()> {
        let attempt_id = AttemptId::new();
        let cancel = caller_cancel.child_token();
        // A sign-out after this point must win over the attempt's grant.
        let epoch = session.refresher.epoch();

        {
            let mut slot = self.lock_attempt();
            if let Some(active) = slot.as_ref() {
                if !supersede {
                    return Err(AuthError::AuthenticationInProgress);
                }
                info!(superseded = %active.id, "Superseding in-flight sign-in");
                active.cancel.cancel();
            }
            *slot = Some(ActiveAttempt {
                id: attempt_id,
                cancel: cancel.clone(),
            });
        }

        self.transition(SessionState::Authenticating);
        self.emit(AuthEvent::SigningIn {
            attempt_id: attempt_id.to_string(),
        });

        let outcome = async {
            let challenge = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                challenge = session.flow.begin(&session.options.scopes, attempt_id, on_code_ready.as_ref()) => challenge?,
            };
            session.flow.await_approval(&challenge, &cancel).await
        }
        .await;

        match outcome {
            Ok(grant) if self.is_current_attempt(attempt_id) => {
                let credential = match session.refresher.adopt(grant, epoch).await {
                    Ok(credential) => credential,
                    Err(e) => {
                        debug!(attempt_id = %attempt_id, "Session ended before approval was committed");
                        return Err(e);
                    }
                };
                if self.finish_attempt(attempt_id, SessionState::Authenticated) {
                    self.emit(AuthEvent::SignedIn {
                        account: credential.account().username.clone(),
                    });
                }
                info!(account = %credential.account_identifier(), "Signed in");
                Ok(())
            }
            Ok(_) => {
                debug!(attempt_id = %attempt_id, "Approval arrived for a superseded attempt");
                Err(AuthError::Cancelled)
            }
            Err(e) => {
                warn!(attempt_id = %attempt_id, error = %e, "Interactive sign-in failed");
                self.finish_attempt(attempt_id, SessionState::Initialized);
                self.emit(AuthEvent::AuthError {
                    message: e.to_string(),
                    recoverable: !matches!(e, AuthError::InvalidClient(_)),
                });
                Err(e)
            }
        }
    }

    /// Ends the session: cancels any interactive attempt, removes the account
    /// from the provider best-effort, and deletes cached and persisted
    /// credentials. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before `initialize`
    /// - `StorageUnavailable` if the persisted blob could not be deleted; the
    ///   session is signed out regardless
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let session = self.require_session()?;

        if self.state() == SessionState::SignedOut {
            debug!("Already signed out");
            return Ok(());
        }

        self.cancel_attempt();

        let account = session.refresher.account();
        if let Some(account) = &account {
            if let Err(e) = self
                .deps
                .provider
                .remove_account(&session.client, account)
                .await
            {
                warn!(error = %e, "Failed to remove account from identity provider");
            }
        }

        let result = session.refresher.forget().await;
        self.transition(SessionState::SignedOut);
        self.emit(AuthEvent::SignedOut {
            account: account.map(|a| a.username),
        });
        info!("Signed out");
        result
    }

    /// A credential valid for at least the configured lead time. Call before
    /// every outbound API request.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before `initialize`
    /// - `ReauthRequired` if a new interactive sign-in is needed; an
    ///   authenticated session drops back to `Initialized`
    /// - `ProviderUnavailable` / `Cancelled`
    pub async fn acquire_token(&self, cancel: &CancellationToken) -> Result<Credential> {
        let session = self.require_session()?;
        match session
            .refresher
            .ensure_valid(session.options.refresh_lead_time, cancel)
            .await
        {
            Ok(credential) => {
                if self.state() == SessionState::Initialized {
                    self.mark_authenticated(&credential);
                }
                Ok(credential)
            }
            Err(e) => {
                self.demote_if_reauth(&e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries and subscriptions
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().is_initialized()
    }

    /// Authenticated and holding an unexpired credential.
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated() && self.cache.is_valid_now()
    }

    /// The signed-in account, while authenticated.
    pub fn current_account(&self) -> Option<Account> {
        if self.state().is_authenticated() {
            self.cache.account()
        } else {
            None
        }
    }

    pub fn client_id(&self) -> Option<String> {
        self.current_session().map(|s| s.client.client_id.clone())
    }

    /// Every auth and session event.
    pub fn subscribe(&self) -> EventStream {
        self.deps.event_bus.stream()
    }

    /// Only `StatusChanged` events.
    pub fn status_changes(&self) -> EventStream {
        self.deps
            .event_bus
            .stream()
            .filter(|event| event.authentication_status().is_some())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.deps.event_bus
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn current_session(&self) -> Option<Arc<Session>> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write_session(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<Session>>> {
        match self.session.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn require_session(&self) -> Result<Arc<Session>> {
        self.current_session().ok_or(AuthError::NotInitialized)
    }

    fn lock_attempt(&self) -> std::sync::MutexGuard<'_, Option<ActiveAttempt>> {
        match self.attempt.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_current_attempt(&self, id: AttemptId) -> bool {
        self.lock_attempt().as_ref().map_or(false, |a| a.id == id)
    }

    /// Applies `to` if `id` is still the active attempt. Returns whether it was.
    fn finish_attempt(&self, id: AttemptId, to: SessionState) -> bool {
        let mut slot = self.lock_attempt();
        if slot.as_ref().map_or(false, |a| a.id == id) {
            slot.take();
            drop(slot);
            self.transition(to);
            true
        } else {
            false
        }
    }

    fn cancel_attempt(&self) {
        if let Some(active) = self.lock_attempt().take() {
            info!(attempt_id = %active.id, "Cancelling in-flight sign-in");
            active.cancel.cancel();
        }
    }

    fn mark_authenticated(&self, credential: &Credential) {
        // Covers credentials seeded from storage, which were cached silently.
        if !self.cache.confirm_authenticated() {
            debug!("Credential was cleared before the session could be marked authenticated");
            return;
        }
        if self.transition(SessionState::Authenticated) {
            self.emit(AuthEvent::SignedIn {
                account: credential.account().username.clone(),
            });
        }
    }

    fn demote_if_reauth(&self, error: &AuthError) {
        if error.requires_interaction() && self.state() == SessionState::Authenticated {
            info!("Credential can no longer be renewed; session needs a new sign-in");
            self.transition(SessionState::Initialized);
            self.cache.revoke_authenticated();
        }
    }

    /// Returns whether the state actually changed.
    fn transition(&self, to: SessionState) -> bool {
        let from = self.state.send_replace(to);
        if from == to {
            return false;
        }
        debug!(from = %from, to = %to, "Session state changed");
        let _ = self
            .deps
            .event_bus
            .emit(CoreEvent::Session(SessionEvent::StateChanged {
                from: from.to_string(),
                to: to.to_string(),
            }));
        true
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.deps.event_bus.emit(CoreEvent::Auth(event));
    }
}
