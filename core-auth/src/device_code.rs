//! Interactive device-code grant
//!
//! ```text
//! begin ──> DeviceCodeChallenge ──> present (clipboard, browser, callback)
//!                  │
//!                  v
//! await_approval: sleep(interval) ─> poll ─┬─ Pending   ─> sleep again
//!                  ^                       ├─ SlowDown  ─> interval += 5s
//!                  └───────────────────────┤
//!                                          ├─ Approved  ─> TokenGrant
//!                                          └─ error     ─> Expired / AccessDenied / ...
//! ```
//!
//! Cancellation is checked while sleeping and while a poll is in flight, so
//! a cancelled attempt returns within one polling interval.

use crate::automation::{CodePresenter, CodeReadyCallback};
use crate::error::{AuthError, Result};
use crate::provider::{ClientRegistration, IdentityProvider, PollOutcome};
use crate::types::{AttemptId, DeviceCodeChallenge, TokenGrant};
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Never poll faster than this, whatever the provider says.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Added to the interval on every `slow_down`.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

pub struct DeviceCodeFlow {
    provider: Arc<dyn IdentityProvider>,
    client: ClientRegistration,
    clock: Arc<dyn Clock>,
    presenter: Arc<CodePresenter>,
    event_bus: EventBus,
}

impl DeviceCodeFlow {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        client: ClientRegistration,
        clock: Arc<dyn Clock>,
        presenter: Arc<CodePresenter>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            provider,
            client,
            clock,
            presenter,
            event_bus,
        }
    }

    /// Requests a device code for attempt `attempt_id` and shows it to the
    /// user.
    ///
    /// # Errors
    ///
    /// - `ProviderUnavailable` if the identity provider cannot be reached
    /// - `InvalidClient` if the app registration is rejected
    #[instrument(skip(self, scopes, on_code_ready))]
    pub async fn begin(
        &self,
        scopes: &[String],
        attempt_id: AttemptId,
        on_code_ready: Option<&CodeReadyCallback>,
    ) -> Result<DeviceCodeChallenge> {
        let mut challenge = self.provider.request_device_code(&self.client, scopes).await?;
        challenge.attempt_id = attempt_id;

        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::DeviceCodeIssued {
                attempt_id: challenge.attempt_id.to_string(),
                user_code: challenge.user_code.clone(),
                verification_uri: challenge.verification_uri.clone(),
                expires_at: challenge.expires_at.timestamp(),
            }));
        info!(
            attempt_id = %challenge.attempt_id,
            verification_uri = %challenge.verification_uri,
            "{}",
            challenge.instructions()
        );

        let report = self.presenter.present(&challenge, on_code_ready).await;
        debug!(?report, "Device code presented");

        Ok(challenge)
    }

    /// Polls until the user approves, the code expires, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if `cancel` fired first
    /// - `Expired` once the code's lifetime has elapsed
    /// - any non-retryable provider error (`AccessDenied`, `InvalidClient`, ...)
    #[instrument(skip(self, challenge, cancel), fields(attempt_id = %challenge.attempt_id))]
    pub async fn await_approval(
        &self,
        challenge: &DeviceCodeChallenge,
        cancel: &CancellationToken,
    ) -> Result<TokenGrant> {
        let mut interval = challenge.polling_interval.max(MIN_POLL_INTERVAL);
        let remaining = (challenge.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + remaining;

        loop {
            let wake = (Instant::now() + interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Device code sign-in cancelled");
                    return Err(AuthError::Cancelled);
                }
                _ = sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                warn!("Device code expired before approval");
                return Err(AuthError::Expired);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Device code sign-in cancelled");
                    return Err(AuthError::Cancelled);
                }
                outcome = self.provider.poll_device_code(&self.client, challenge) => outcome,
            };

            match outcome {
                Ok(PollOutcome::Approved(grant)) => return Ok(grant),
                Ok(PollOutcome::Pending) => {
                    debug!("Authorization pending");
                }
                Ok(PollOutcome::SlowDown) | Err(AuthError::SlowDown) => {
                    interval += SLOW_DOWN_INCREMENT;
                    debug!(interval_secs = interval.as_secs(), "Provider asked to slow down");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Account, Credential};
    use async_trait::async_trait;
    use bridge_traits::automation::InlineExecutor;
    use bridge_traits::time::ManualClock;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted poll outcomes; `Pending` once the script runs out.
    struct ScriptedProvider {
        outcomes: Mutex<VecDeque<Result<PollOutcome>>>,
        polls: AtomicUsize,
        clock: Arc<ManualClock>,
        expires_in: ChronoDuration,
    }

    impl ScriptedProvider {
        fn new(clock: Arc<ManualClock>, outcomes: Vec<Result<PollOutcome>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                polls: AtomicUsize::new(0),
                clock,
                expires_in: ChronoDuration::minutes(15),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn request_device_code(
            &self,
            _client: &ClientRegistration,
            _scopes: &[String],
        ) -> Result<DeviceCodeChallenge> {
            Ok(DeviceCodeChallenge {
                attempt_id: AttemptId::new(),
                user_code: "F7Q2KLMN".to_string(),
                verification_uri: "https://microsoft.com/devicelogin".to_string(),
                verification_uri_complete: None,
                expires_at: self.clock.now() + self.expires_in,
                polling_interval: Duration::from_secs(5),
                message: None,
                device_code: "dc".to_string(),
            })
        }

        async fn poll_device_code(
            &self,
            _client: &ClientRegistration,
            _challenge: &DeviceCodeChallenge,
        ) -> Result<PollOutcome> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PollOutcome::Pending))
        }

        async fn acquire_token_silent(
            &self,
            _client: &ClientRegistration,
            _account: &Account,
            _refresh_token: &str,
            _scopes: &[String],
        ) -> Result<TokenGrant> {
            Err(AuthError::ReauthRequired("not scripted".into()))
        }
    }

    fn grant(clock: &ManualClock) -> TokenGrant {
        TokenGrant {
            credential: Credential::new(
                "at",
                clock.now() + ChronoDuration::hours(1),
                Account::new("oid.tid", "adele@contoso.com"),
                ["User.Read"],
            ),
            refresh_token: Some("rt".to_string()),
        }
    }

    fn flow(provider: Arc<ScriptedProvider>, clock: Arc<ManualClock>) -> DeviceCodeFlow {
        let client =
            ClientRegistration::new("client", "https://login.microsoftonline.com/common").unwrap();
        let presenter = Arc::new(CodePresenter::new(
            Arc::new(InlineExecutor),
            Duration::from_secs(5),
        ));
        DeviceCodeFlow::new(provider, client, clock, presenter, EventBus::new(16))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_approved() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::new(
            clock.clone(),
            vec![
                Ok(PollOutcome::Pending),
                Ok(PollOutcome::Pending),
                Ok(PollOutcome::Approved(grant(&clock))),
            ],
        ));
        let flow = flow(provider.clone(), clock);

        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();
        let started = Instant::now();
        let grant = flow
            .await_approval(&challenge, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(grant.credential.bearer_token(), "at");
        assert_eq!(provider.polls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_down_widens_interval() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::new(
            clock.clone(),
            vec![
                Ok(PollOutcome::SlowDown),
                Ok(PollOutcome::Approved(grant(&clock))),
            ],
        ));
        let flow = flow(provider.clone(), clock);

        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();
        let started = Instant::now();
        flow.await_approval(&challenge, &CancellationToken::new())
            .await
            .unwrap();

        // 5s before the first poll, then 10s after slow_down.
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_returned() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::new(
            clock.clone(),
            vec![Ok(PollOutcome::Pending), Err(AuthError::Expired)],
        ));
        let flow = flow(provider, clock);

        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();
        let result = flow
            .await_approval(&challenge, &CancellationToken::new())
            .await;

        assert_eq!(result, Err(AuthError::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_deadline_expires_endless_pending() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut provider = ScriptedProvider::new(clock.clone(), vec![]);
        provider.expires_in = ChronoDuration::seconds(12);
        let provider = Arc::new(provider);
        let flow = flow(provider.clone(), clock);

        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();
        let result = flow
            .await_approval(&challenge, &CancellationToken::new())
            .await;

        assert_eq!(result, Err(AuthError::Expired));
        assert_eq!(provider.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_poll() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::new(clock.clone(), vec![]));
        let flow = flow(provider, clock);
        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = flow.await_approval(&challenge, &cancel).await;

        assert_eq!(result, Err(AuthError::Cancelled));
        assert!(started.elapsed() <= Duration::from_secs(7) + challenge.polling_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_denied_stops_polling() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::new(
            clock.clone(),
            vec![Err(AuthError::AccessDenied)],
        ));
        let flow = flow(provider.clone(), clock);

        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();
        let result = flow
            .await_approval(&challenge, &CancellationToken::new())
            .await;

        assert_eq!(result, Err(AuthError::AccessDenied));
        assert_eq!(provider.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_begin_emits_device_code_event() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::new(clock.clone(), vec![]));
        let client =
            ClientRegistration::new("client", "https://login.microsoftonline.com/common").unwrap();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let presenter = Arc::new(CodePresenter::new(
            Arc::new(InlineExecutor),
            Duration::from_secs(5),
        ));
        let flow = DeviceCodeFlow::new(provider, client, clock, presenter, bus);

        let challenge = flow.begin(&[], AttemptId::new(), None).await.unwrap();

        match rx.recv().await.unwrap() {
            CoreEvent::Auth(AuthEvent::DeviceCodeIssued {
                user_code,
                attempt_id,
                ..
            }) => {
                assert_eq!(user_code, "F7Q2KLMN");
                assert_eq!(attempt_id, challenge.attempt_id.to_string());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
