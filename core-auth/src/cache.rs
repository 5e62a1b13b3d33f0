//! In-memory credential slot
//!
//! The cache holds at most one [`Credential`]. Writers swap the whole value
//! through a `tokio::sync::watch` channel, so readers always observe either
//! the old credential or the new one, never a mix.
//!
//! Status changes are announced on the [`EventBus`] as
//! `AuthEvent::StatusChanged`, exactly once per actual transition.

use crate::types::{Account, Credential};
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Publishes authentication-status transitions, suppressing repeats.
pub struct AuthStatusNotifier {
    event_bus: EventBus,
    last_announced: Mutex<bool>,
}

impl AuthStatusNotifier {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            last_announced: Mutex::new(false),
        }
    }

    /// Emits `StatusChanged` if `authenticated` differs from the last
    /// announced value. Returns whether an event was emitted.
    pub fn announce(&self, authenticated: bool) -> bool {
        let mut last = match self.last_announced.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last == authenticated {
            return false;
        }
        *last = authenticated;
        drop(last);

        debug!(authenticated, "Authentication status changed");
        // No subscribers is not an error for a publisher.
        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::StatusChanged { authenticated }));
        true
    }

    pub fn last_announced(&self) -> bool {
        match self.last_announced.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Holds the currently known credential.
///
/// # Examples
///
/// ```
/// use core_auth::{Account, Credential, CredentialCache};
/// use bridge_traits::time::SystemClock;
/// use core_runtime::events::EventBus;
/// use chrono::{Duration, Utc};
/// use std::sync::Arc;
/// use std::time::Duration as StdDuration;
///
/// let cache = CredentialCache::new(Arc::new(SystemClock), EventBus::default());
/// assert!(!cache.is_fresh(StdDuration::from_secs(300)));
///
/// cache.set(Credential::new(
///     "token",
///     Utc::now() + Duration::hours(1),
///     Account::new("oid.tid", "adele@contoso.com"),
///     ["User.Read"],
/// ));
/// assert!(cache.is_fresh(StdDuration::from_secs(300)));
/// ```
pub struct CredentialCache {
    slot: watch::Sender<Option<Credential>>,
    clock: Arc<dyn Clock>,
    notifier: AuthStatusNotifier,
    /// Held across a slot write and its announcement.
    writer: Mutex<()>,
}

impl CredentialCache {
    pub fn new(clock: Arc<dyn Clock>, event_bus: EventBus) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot,
            clock,
            notifier: AuthStatusNotifier::new(event_bus),
            writer: Mutex::new(()),
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn replace(&self, value: Option<Credential>, announce: Option<bool>) -> Option<Credential> {
        let _writer = self.lock_writer();
        let previous = self.slot.send_replace(value);
        if let Some(authenticated) = announce {
            self.notifier.announce(authenticated);
        }
        previous
    }

    /// Snapshot of the current credential.
    pub fn get(&self) -> Option<Credential> {
        self.slot.borrow().clone()
    }

    pub fn account(&self) -> Option<Account> {
        self.slot.borrow().as_ref().map(|c| c.account().clone())
    }

    /// True iff a credential exists and `now + lead_time < expires_at`.
    pub fn is_fresh(&self, lead_time: Duration) -> bool {
        let now = self.clock.now();
        self.slot
            .borrow()
            .as_ref()
            .map_or(false, |c| c.is_fresh_at(now, lead_time))
    }

    /// True iff a credential exists and has not expired.
    pub fn is_valid_now(&self) -> bool {
        let now = self.clock.now();
        self.slot
            .borrow()
            .as_ref()
            .map_or(false, |c| c.is_valid_at(now))
    }

    /// Replaces the credential and announces `authenticated = true` if the
    /// session was not already announced as authenticated.
    pub fn set(&self, credential: Credential) {
        debug!(
            account = %credential.account_identifier(),
            expires_at = %credential.expires_at(),
            "Caching credential"
        );
        self.replace(Some(credential), Some(true));
    }

    /// Seeds the cache from persisted state without announcing anything.
    pub fn restore(&self, credential: Credential) {
        self.replace(Some(credential), None);
    }

    /// Removes the credential and announces `authenticated = false` if needed.
    pub fn clear(&self) -> Option<Credential> {
        self.replace(None, Some(false))
    }

    /// Announces `authenticated = true` for a credential already in the slot,
    /// such as one seeded by [`restore`](Self::restore). Returns false, without
    /// announcing, if the slot is empty.
    pub fn confirm_authenticated(&self) -> bool {
        let _writer = self.lock_writer();
        if self.slot.borrow().is_none() {
            return false;
        }
        self.notifier.announce(true);
        true
    }

    /// Announces `authenticated = false` while keeping the credential, for a
    /// session that can no longer be renewed.
    pub fn revoke_authenticated(&self) {
        let _writer = self.lock_writer();
        self.notifier.announce(false);
    }

    /// Receiver that wakes on every replacement.
    pub fn watch(&self) -> watch::Receiver<Option<Credential>> {
        self.slot.subscribe()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
