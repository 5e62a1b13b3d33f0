//! Shared fakes for unit tests.

use crate::error::{AuthError, Result};
use crate::provider::{ClientRegistration, IdentityProvider, PollOutcome};
use crate::types::{Account, AttemptId, Credential, DeviceCodeChallenge, TokenGrant};
use async_trait::async_trait;
use bridge_traits::time::{Clock, ManualClock};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn account() -> Account {
    Account {
        home_account_id: "oid-1.tid-1".to_string(),
        username: "adele@contoso.com".to_string(),
        display_name: Some("Adele Vance".to_string()),
        tenant_id: Some("tid-1".to_string()),
    }
}

pub(crate) fn registration() -> ClientRegistration {
    ClientRegistration::new("client-id", "https://login.microsoftonline.com/common")
        .expect("valid registration")
}

pub(crate) fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc::now()))
}

pub(crate) fn grant_expiring_in(
    clock: &dyn Clock,
    token: &str,
    lifetime: ChronoDuration,
) -> TokenGrant {
    TokenGrant {
        credential: Credential::new(
            token,
            clock.now() + lifetime,
            account(),
            ["Files.ReadWrite.All", "User.Read"],
        ),
        refresh_token: Some("refresh-token".to_string()),
    }
}

/// Scriptable provider that counts every call.
pub(crate) struct FakeProvider {
    pub clock: Arc<ManualClock>,
    pub silent_calls: AtomicUsize,
    pub device_code_requests: AtomicUsize,
    pub polls: AtomicUsize,
    pub removals: AtomicUsize,
    pub silent_error: Mutex<Option<AuthError>>,
    pub silent_delay: Duration,
    pub poll_script: Mutex<VecDeque<Result<PollOutcome>>>,
    pub token_lifetime: ChronoDuration,
}

impl FakeProvider {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            silent_calls: AtomicUsize::new(0),
            device_code_requests: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
            silent_error: Mutex::new(None),
            silent_delay: Duration::ZERO,
            poll_script: Mutex::new(VecDeque::new()),
            token_lifetime: ChronoDuration::hours(1),
        }
    }

    pub fn with_silent_delay(mut self, delay: Duration) -> Self {
        self.silent_delay = delay;
        self
    }

    pub fn fail_silent_with(&self, error: AuthError) {
        *self.silent_error.lock().unwrap() = Some(error);
    }

    pub fn script_polls(&self, outcomes: Vec<Result<PollOutcome>>) {
        *self.poll_script.lock().unwrap() = outcomes.into();
    }

    pub fn silent_calls(&self) -> usize {
        self.silent_calls.load(Ordering::SeqCst)
    }

    pub fn device_code_requests(&self) -> usize {
        self.device_code_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn request_device_code(
        &self,
        _client: &ClientRegistration,
        _scopes: &[String],
    ) -> Result<DeviceCodeChallenge> {
        self.device_code_requests.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceCodeChallenge {
            attempt_id: AttemptId::new(),
            user_code: "F7Q2KLMN".to_string(),
            verification_uri: "https://microsoft.com/devicelogin".to_string(),
            verification_uri_complete: None,
            expires_at: self.clock.now() + ChronoDuration::minutes(15),
            polling_interval: Duration::from_secs(1),
            message: None,
            device_code: "device-code".to_string(),
        })
    }

    async fn poll_device_code(
        &self,
        _client: &ClientRegistration,
        _challenge: &DeviceCodeChallenge,
    ) -> Result<PollOutcome> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.poll_script.lock().unwrap().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(PollOutcome::Approved(grant_expiring_in(
                self.clock.as_ref(),
                "interactive-token",
                self.token_lifetime,
            ))),
        }
    }

    async fn acquire_token_silent(
        &self,
        _client: &ClientRegistration,
        _account: &Account,
        _refresh_token: &str,
        _scopes: &[String],
    ) -> Result<TokenGrant> {
        let n = self.silent_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.silent_delay.is_zero() {
            tokio::time::sleep(self.silent_delay).await;
        }
        if let Some(error) = self.silent_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(grant_expiring_in(
            self.clock.as_ref(),
            &format!("silent-token-{}", n),
            self.token_lifetime,
        ))
    }

    async fn remove_account(&self, _client: &ClientRegistration, _account: &Account) -> Result<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
