//! End-to-end session behaviour through the public API.

use async_trait::async_trait;
use bridge_traits::storage::{KeyValueStore, MemoryKeyValueStore};
use bridge_traits::time::{Clock, ManualClock};
use chrono::{Duration as ChronoDuration, Utc};
use core_auth::{
    Account, AttemptId, AuthDependencies, AuthError, AuthSessionManager, CancellationToken,
    ClientRegistration, Credential, DeviceCodeChallenge, IdentityProvider, PersistedBlob,
    PollOutcome, SessionState, TokenGrant, TokenStore,
};
use core_runtime::config::AuthOptions;
use core_runtime::events::EventBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CACHE_KEY: &str = "onedrive.token_cache";

fn account() -> Account {
    Account::new("oid.tid", "adele@contoso.com")
}

fn grant(clock: &dyn Clock, token: &str, lifetime: ChronoDuration) -> TokenGrant {
    TokenGrant {
        credential: Credential::new(token, clock.now() + lifetime, account(), ["User.Read"]),
        refresh_token: Some("refresh".to_string()),
    }
}

/// Identity provider double with call counters and an optional renewal delay.
struct FakeIdentityProvider {
    clock: Arc<ManualClock>,
    silent_calls: AtomicUsize,
    device_codes: AtomicUsize,
    silent_delay: Duration,
    poll_error: Mutex<Option<AuthError>>,
    pending_polls: AtomicUsize,
}

impl FakeIdentityProvider {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            silent_calls: AtomicUsize::new(0),
            device_codes: AtomicUsize::new(0),
            silent_delay: Duration::from_millis(25),
            poll_error: Mutex::new(None),
            pending_polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn request_device_code(
        &self,
        _client: &ClientRegistration,
        _scopes: &[String],
    ) -> core_auth::Result<DeviceCodeChallenge> {
        self.device_codes.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceCodeChallenge {
            attempt_id: AttemptId::new(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://microsoft.com/devicelogin".to_string(),
            verification_uri_complete: None,
            expires_at: self.clock.now() + ChronoDuration::minutes(15),
            polling_interval: Duration::from_secs(5),
            message: None,
            device_code: "opaque".to_string(),
        })
    }

    async fn poll_device_code(
        &self,
        _client: &ClientRegistration,
        _challenge: &DeviceCodeChallenge,
    ) -> core_auth::Result<PollOutcome> {
        if self.pending_polls.load(Ordering::SeqCst) > 0 {
            self.pending_polls.fetch_sub(1, Ordering::SeqCst);
            return Ok(PollOutcome::Pending);
        }
        if let Some(error) = self.poll_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(PollOutcome::Approved(grant(
            self.clock.as_ref(),
            "interactive",
            ChronoDuration::hours(1),
        )))
    }

    async fn acquire_token_silent(
        &self,
        _client: &ClientRegistration,
        _account: &Account,
        _refresh_token: &str,
        _scopes: &[String],
    ) -> core_auth::Result<TokenGrant> {
        self.silent_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.silent_delay).await;
        Ok(grant(self.clock.as_ref(), "renewed", ChronoDuration::hours(1)))
    }
}

struct Harness {
    manager: Arc<AuthSessionManager>,
    provider: Arc<FakeIdentityProvider>,
    store: Arc<MemoryKeyValueStore>,
    clock: Arc<ManualClock>,
}

async fn harness(persisted_lifetime: Option<ChronoDuration>) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let provider = Arc::new(FakeIdentityProvider::new(clock.clone()));
    let store = Arc::new(MemoryKeyValueStore::new());

    if let Some(lifetime) = persisted_lifetime {
        let grant = grant(clock.as_ref(), "persisted", lifetime);
        TokenStore::new(store.clone(), CACHE_KEY)
            .save(&PersistedBlob::from_grant(&grant))
            .await
            .unwrap();
    }

    let manager = Arc::new(AuthSessionManager::new(
        AuthDependencies::new(provider.clone(), store.clone())
            .with_clock(clock.clone())
            .with_event_bus(EventBus::new(256)),
    ));
    manager
        .initialize(
            "11111111-2222-3333-4444-555555555555",
            AuthOptions::default().with_interactive_fallback(false),
        )
        .await
        .unwrap();

    Harness {
        manager,
        provider,
        store,
        clock,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_inside_freshness_window_make_no_calls() {
    let h = harness(Some(ChronoDuration::minutes(10))).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.acquire_token(&CancellationToken::new()).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().bearer_token(), "persisted");
    }

    assert_eq!(h.provider.silent_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stale_callers_trigger_exactly_one_renewal() {
    let h = harness(Some(ChronoDuration::minutes(2))).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.acquire_token(&CancellationToken::new()).await })
        })
        .collect();

    let mut credentials = Vec::new();
    for task in tasks {
        credentials.push(task.await.unwrap().unwrap());
    }

    assert_eq!(h.provider.silent_calls.load(Ordering::SeqCst), 1);
    assert!(credentials.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(credentials[0].bearer_token(), "renewed");
}

#[tokio::test]
async fn renewed_credential_is_cached_and_persisted() {
    let h = harness(Some(ChronoDuration::minutes(2))).await;

    h.manager.quick_authenticate().await.unwrap();

    assert_eq!(h.provider.silent_calls.load(Ordering::SeqCst), 1);
    let blob = TokenStore::new(h.store.clone(), CACHE_KEY)
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.credential().unwrap().bearer_token(), "renewed");
    assert_eq!(
        blob.credential().unwrap().expires_at(),
        h.clock.now() + ChronoDuration::hours(1)
    );
}

#[tokio::test]
async fn fresh_manager_without_blob_requires_reauth() {
    let h = harness(None).await;

    let result = h.manager.quick_authenticate().await;

    assert!(matches!(result, Err(AuthError::ReauthRequired(_))));
    assert_eq!(h.provider.silent_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sign_out_twice_succeeds_and_clears_storage() {
    let h = harness(Some(ChronoDuration::hours(1))).await;
    h.manager.quick_authenticate().await.unwrap();
    assert!(h.manager.is_authenticated());

    h.manager.sign_out().await.unwrap();
    h.manager.sign_out().await.unwrap();

    assert_eq!(h.manager.state(), SessionState::SignedOut);
    assert!(h.store.read(CACHE_KEY).await.unwrap().is_none());
    assert!(h.manager.current_account().is_none());
}

#[tokio::test(start_paused = true)]
async fn expired_device_code_returns_to_initialized() {
    let h = harness(None).await;
    *h.provider.poll_error.lock().unwrap() = Some(AuthError::Expired);

    let result = h.manager.authenticate(None, None).await;

    assert_eq!(result, Err(AuthError::Expired));
    assert_eq!(h.manager.state(), SessionState::Initialized);
    assert!(!h.manager.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_poll_returns_within_one_interval() {
    let h = harness(None).await;
    h.provider.pending_polls.store(1_000, Ordering::SeqCst);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let result = h.manager.authenticate(None, Some(cancel)).await;

    assert_eq!(result, Err(AuthError::Cancelled));
    assert!(started.elapsed() <= Duration::from_secs(12 + 5));
    assert_eq!(h.manager.state(), SessionState::Initialized);
    assert!(TokenStore::new(h.store.clone(), CACHE_KEY)
        .load()
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn sign_in_after_sign_out() {
    let h = harness(Some(ChronoDuration::hours(1))).await;
    h.manager.quick_authenticate().await.unwrap();
    h.manager.sign_out().await.unwrap();

    h.manager.authenticate(None, None).await.unwrap();

    assert_eq!(h.manager.state(), SessionState::Authenticated);
    assert_eq!(h.provider.device_codes.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.manager.current_account().map(|a| a.username),
        Some("adele@contoso.com".to_string())
    );
}
