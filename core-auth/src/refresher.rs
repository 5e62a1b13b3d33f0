//! Single-flight credential renewal
//!
//! [`TokenRefresher::ensure_valid`] is the one place where a stale credential
//! turns into a provider call. Concurrent callers that find the cache stale
//! share a single in-flight renewal:
//!
//! 1. Fast path: the cached credential is fresh, return it without I/O.
//! 2. Take the gate and re-check freshness; another caller may have just
//!    finished a renewal.
//! 3. Join the in-flight renewal if one exists, otherwise start one and
//!    publish it in the slot.
//! 4. Await the shared result outside the gate.
//!
//! Renewal runs as its own task, so a caller giving up (cancellation) does
//! not abort it for the other waiters.
//!
//! Commits and [`TokenRefresher::forget`] are serialized: a result is only
//! written to the cache and the store if no `forget` happened since the
//! renewal (or interactive attempt) started.

use crate::automation::CodeReadyCallback;
use crate::cache::CredentialCache;
use crate::device_code::DeviceCodeFlow;
use crate::error::{AuthError, Result};
use crate::provider::{ClientRegistration, IdentityProvider};
use crate::token_store::{PersistedBlob, TokenStore};
use crate::types::{Account, AttemptId, Credential, TokenGrant};
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Whether a rejected silent renewal may fall back to a device-code sign-in.
///
/// `DeviceCode` is for a refresher used on its own. [`AuthSessionManager`]
/// builds its refresher with `Disallowed` and runs the fallback as a tracked
/// sign-in attempt instead.
///
/// [`AuthSessionManager`]: crate::manager::AuthSessionManager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractivePolicy {
    #[default]
    Disallowed,
    DeviceCode,
}

type SharedRenewal = Shared<BoxFuture<'static, Result<Credential>>>;

/// Provider-side state needed for silent renewal.
#[derive(Default)]
struct RenewalState {
    account: Option<Account>,
    refresh_token: Option<String>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    client: ClientRegistration,
    scopes: Vec<String>,
    cache: Arc<CredentialCache>,
    store: TokenStore,
    flow: Arc<DeviceCodeFlow>,
    event_bus: EventBus,
    policy: InteractivePolicy,
    renewal: StdMutex<RenewalState>,
    gate: Mutex<Option<SharedRenewal>>,
    /// Bumped by `forget`; results obtained under an older epoch do not commit.
    epoch: AtomicU64,
    /// Held across the epoch check and the write it guards, and by `forget`.
    commits: Mutex<()>,
    interactive_cancel: StdMutex<CancellationToken>,
    on_code_ready: StdMutex<Option<CodeReadyCallback>>,
}

/// Cheap-to-clone handle; all clones share one gate.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<Inner>,
}

impl TokenRefresher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        client: ClientRegistration,
        scopes: Vec<String>,
        cache: Arc<CredentialCache>,
        store: TokenStore,
        flow: Arc<DeviceCodeFlow>,
        event_bus: EventBus,
        policy: InteractivePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                client,
                scopes,
                cache,
                store,
                flow,
                event_bus,
                policy,
                renewal: StdMutex::new(RenewalState::default()),
                gate: Mutex::new(None),
                epoch: AtomicU64::new(0),
                commits: Mutex::new(()),
                interactive_cancel: StdMutex::new(CancellationToken::new()),
                on_code_ready: StdMutex::new(None),
            }),
        }
    }

    /// Returns a credential valid for at least `lead_time`, renewing it if
    /// needed.
    ///
    /// # Errors
    ///
    /// - `ReauthRequired` if there is nothing to renew with, or the provider
    ///   rejected the renewal (cached and persisted state is then cleared)
    /// - `ProviderUnavailable` / `Unknown` if renewal failed transiently and
    ///   the cached credential has already expired
    /// - `Cancelled` if `cancel` fired before the renewal finished
    ///
    /// Under `InteractivePolicy::DeviceCode`, a caller cancelling also
    /// abandons a device-code fallback in progress.
    pub async fn ensure_valid(
        &self,
        lead_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        if let Some(credential) = self.fresh(lead_time) {
            return Ok(credential);
        }

        let renewal = {
            let mut slot = self.inner.gate.lock().await;
            if let Some(credential) = self.fresh(lead_time) {
                return Ok(credential);
            }
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token renewal");
                    in_flight.clone()
                }
                None => {
                    let renewal = self.spawn_renewal();
                    *slot = Some(renewal.clone());
                    renewal
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if self.inner.policy == InteractivePolicy::DeviceCode {
                    self.inner.cancel_interactive();
                }
                Err(AuthError::Cancelled)
            }
            result = renewal => result,
        }
    }

    /// Callback handed the challenge when the device-code fallback starts.
    pub fn set_code_ready_callback(&self, callback: Option<CodeReadyCallback>) {
        match self.inner.on_code_ready.lock() {
            Ok(mut guard) => *guard = callback,
            Err(poisoned) => *poisoned.into_inner() = callback,
        }
    }

    fn fresh(&self, lead_time: Duration) -> Option<Credential> {
        if self.inner.cache.is_fresh(lead_time) {
            self.inner.cache.get()
        } else {
            None
        }
    }

    fn spawn_renewal(&self) -> SharedRenewal {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = inner.renew().await;
            inner.gate.lock().await.take();
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                error!(error = %e, "Token renewal task failed");
                Err(AuthError::Unknown(format!("token renewal task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Current session epoch. Capture it before starting an interactive
    /// sign-in and hand it to [`adopt`](Self::adopt).
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Commits an interactively obtained grant.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the session was forgotten after `epoch` was taken; the
    /// grant is then dropped.
    pub async fn adopt(&self, grant: TokenGrant, epoch: u64) -> Result<Credential> {
        let _commits = self.inner.commits.lock().await;
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session was forgotten during sign-in; discarding grant");
            return Err(AuthError::Cancelled);
        }
        Ok(self.inner.commit(grant).await)
    }

    /// Seeds cache and renewal state from a persisted blob.
    pub fn restore_from(&self, blob: &PersistedBlob) {
        {
            let mut renewal = self.inner.lock_renewal();
            renewal.account = Some(blob.account().clone());
            renewal.refresh_token = blob.refresh_token().map(str::to_string);
        }
        if let Some(credential) = blob.credential() {
            self.inner.cache.restore(credential);
        }
        debug!(account = %blob.account().home_account_id, "Restored persisted session");
    }

    /// Drops every trace of the session: cache, renewal state, persisted
    /// blob. An in-flight renewal is cancelled and will not commit.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` if the persisted blob could not be deleted; the
    /// in-memory state is cleared regardless.
    pub async fn forget(&self) -> Result<()> {
        let _commits = self.inner.commits.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_interactive();
        *self.inner.lock_renewal() = RenewalState::default();
        self.inner.cache.clear();
        self.inner.store.clear().await
    }

    /// The account renewal would act for.
    pub fn account(&self) -> Option<Account> {
        self.inner
            .lock_renewal()
            .account
            .clone()
            .or_else(|| self.inner.cache.account())
    }

    pub fn can_renew_silently(&self) -> bool {
        let renewal = self.inner.lock_renewal();
        renewal.account.is_some() && renewal.refresh_token.is_some()
    }

    pub fn client(&self) -> &ClientRegistration {
        &self.inner.client
    }
}

impl Inner {
    fn lock_renewal(&self) -> std::sync::MutexGuard<'_, RenewalState> {
        match self.renewal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.event_bus.emit(CoreEvent::Auth(event));
    }

    fn cancel_interactive(&self) {
        let mut cancel = match self.interactive_cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    #[instrument(skip(self))]
    async fn renew(&self) -> Result<Credential> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let (account, refresh_token) = {
            let renewal = self.lock_renewal();
            (renewal.account.clone(), renewal.refresh_token.clone())
        };

        let silent = match (&account, refresh_token) {
            (Some(account), Some(refresh_token)) => {
                self.emit(AuthEvent::TokenRefreshing {
                    account: account.home_account_id.clone(),
                });
                info!(account = %account.home_account_id, "Renewing access token silently");
                self.provider
                    .acquire_token_silent(&self.client, account, &refresh_token, &self.scopes)
                    .await
            }
            _ => {
                debug!("No cached account or refresh token; silent renewal skipped");
                Err(AuthError::ReauthRequired(
                    "no cached account to renew".to_string(),
                ))
            }
        };

        let attempted_silent = account.is_some();
        let outcome = match silent {
            Err(e) if e.requires_interaction() && self.policy == InteractivePolicy::DeviceCode => {
                info!(reason = %e, "Silent renewal rejected; starting device code sign-in");
                self.interactive().await
            }
            other => other,
        };

        let _commits = self.commits.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session was forgotten during renewal; discarding result");
            return Err(AuthError::Cancelled);
        }

        match outcome {
            Ok(grant) => {
                let credential = self.commit(grant).await;
                self.emit(AuthEvent::TokenRefreshed {
                    account: credential.account_identifier().to_string(),
                    expires_at: credential.expires_at().timestamp(),
                });
                Ok(credential)
            }
            Err(e) if e.is_transient() => {
                let now = self.cache.clock().now();
                match self.cache.get().filter(|c| c.is_valid_at(now)) {
                    Some(credential) => {
                        warn!(
                            error = %e,
                            expires_at = %credential.expires_at(),
                            "Renewal failed transiently; using credential until it expires"
                        );
                        Ok(credential)
                    }
                    None => {
                        warn!(error = %e, "Renewal failed transiently");
                        self.emit(AuthEvent::AuthError {
                            message: e.to_string(),
                            recoverable: true,
                        });
                        Err(e)
                    }
                }
            }
            Err(AuthError::Cancelled) => Err(AuthError::Cancelled),
            Err(e) if !attempted_silent && self.policy == InteractivePolicy::Disallowed => {
                // Nothing was sent to the provider; leave state as it is.
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Renewal rejected; clearing credentials");
                self.discard().await;
                self.emit(AuthEvent::AuthError {
                    message: e.to_string(),
                    recoverable: false,
                });
                match e {
                    AuthError::ReauthRequired(reason) => Err(AuthError::ReauthRequired(reason)),
                    other => Err(AuthError::ReauthRequired(other.to_string())),
                }
            }
        }
    }

    async fn interactive(&self) -> Result<TokenGrant> {
        let cancel = match self.interactive_cancel.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let on_code_ready = match self.on_code_ready.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let challenge = self
            .flow
            .begin(&self.scopes, AttemptId::new(), on_code_ready.as_ref())
            .await?;
        self.flow.await_approval(&challenge, &cancel).await
    }

    /// Callers hold `commits` and have checked the epoch.
    async fn commit(&self, grant: TokenGrant) -> Credential {
        let TokenGrant {
            credential,
            refresh_token,
        } = grant;

        {
            let mut renewal = self.lock_renewal();
            renewal.account = Some(credential.account().clone());
            if refresh_token.is_some() {
                renewal.refresh_token = refresh_token.clone();
            }
        }

        let blob = {
            let renewal = self.lock_renewal();
            PersistedBlob::from_grant(&TokenGrant {
                credential: credential.clone(),
                refresh_token: renewal.refresh_token.clone(),
            })
        };
        self.cache.set(credential.clone());

        if let Err(e) = self.store.save(&blob).await {
            // The session still works from memory; the next change retries.
            warn!(error = %e, "Failed to persist renewed credential");
        }
        credential
    }

    async fn discard(&self) {
        *self.lock_renewal() = RenewalState::default();
        self.cache.clear();
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to delete persisted credentials");
        }
    }
}
