use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AuthError, Result};

/// Converts a std lead time into chrono, saturating at one year.
pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365))
}

/// Identifier of one interactive sign-in attempt.
///
/// Correlates the `SigningIn`, `DeviceCodeIssued` and outcome events of a
/// single device-code flow.
///
/// # Examples
///
/// ```
/// use core_auth::AttemptId;
///
/// let first = AttemptId::new();
/// let second = AttemptId::new();
/// assert_ne!(first, second);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The signed-in identity.
///
/// Built from the id_token claims the identity provider returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// `<object id>.<tenant id>` when both are known, the subject otherwise.
    pub home_account_id: String,
    /// Sign-in name, usually an e-mail address.
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl Account {
    pub fn new(home_account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            username: username.into(),
            display_name: None,
            tenant_id: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.home_account_id
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// A bearer token with its provider-reported expiry.
///
/// Credentials are immutable; renewal replaces the whole value.
///
/// # Security
///
/// The `Debug` implementation redacts the token.
///
/// # Examples
///
/// ```
/// use core_auth::{Account, Credential};
/// use chrono::{Duration, Utc};
/// use std::time::Duration as StdDuration;
///
/// let now = Utc::now();
/// let credential = Credential::new(
///     "eyJ0eXAi...",
///     now + Duration::minutes(10),
///     Account::new("oid.tid", "adele@contoso.com"),
///     ["Files.ReadWrite.All"],
/// );
///
/// assert!(credential.is_fresh_at(now, StdDuration::from_secs(300)));
/// assert!(!credential.is_fresh_at(now, StdDuration::from_secs(900)));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    bearer_token: String,
    expires_at: DateTime<Utc>,
    account: Account,
    scopes: BTreeSet<String>,
}

impl Credential {
    pub fn new<I, S>(
        bearer_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        account: Account,
        scopes: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bearer_token: bearer_token.into(),
            expires_at,
            account,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a credential from a provider grant's `expires_in`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unknown` if the provider reported a non-positive
    /// lifetime; such a token could never authorize a request.
    pub fn from_lifetime<I, S>(
        bearer_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_in_secs: i64,
        account: Account,
        scopes: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if expires_in_secs <= 0 {
            return Err(AuthError::Unknown(format!(
                "identity provider returned a token with lifetime {}s",
                expires_in_secs
            )));
        }
        Ok(Self::new(
            bearer_token,
            issued_at + ChronoDuration::seconds(expires_in_secs),
            account,
            scopes,
        ))
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_identifier(&self) -> &str {
        self.account.identifier()
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// `now + lead_time < expires_at`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, lead_time: Duration) -> bool {
        now + to_chrono(lead_time) < self.expires_at
    }

    /// Usable right now, ignoring any lead time.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Returns `None` once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<ChronoDuration> {
        (now < self.expires_at).then(|| self.expires_at - now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bearer_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("account", &self.account.home_account_id)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// What a successful grant hands back: the credential plus the provider's
/// renewal state.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub credential: Credential,
    /// Absent when the provider did not issue one (no `offline_access`).
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("credential", &self.credential)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// The code and URL a user needs to approve a device-code sign-in.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCodeChallenge {
    pub attempt_id: AttemptId,
    /// Short code the user types on the verification page.
    pub user_code: String,
    pub verification_uri: String,
    /// Verification URL with the code pre-filled, when the provider offers one.
    pub verification_uri_complete: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub polling_interval: Duration,
    /// Provider-written instruction text.
    pub message: Option<String>,
    /// Opaque polling handle. Never shown to the user.
    pub device_code: String,
}

impl DeviceCodeChallenge {
    /// Provider text when present, otherwise a generated instruction.
    pub fn instructions(&self) -> String {
        match &self.message {
            Some(message) if !message.trim().is_empty() => message.clone(),
            _ => format!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                self.verification_uri, self.user_code
            ),
        }
    }

    /// The URL worth opening for the user.
    pub fn launch_uri(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for DeviceCodeChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeChallenge")
            .field("attempt_id", &self.attempt_id)
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_at", &self.expires_at)
            .field("polling_interval", &self.polling_interval)
            .field("device_code", &"[REDACTED]")
            .finish()
    }
}

/// Lifecycle of an [`AuthSessionManager`](crate::manager::AuthSessionManager).
///
/// # State Transitions
///
/// ```text
/// Uninitialized -> Initialized -> Authenticating -> Authenticated -> SignedOut
///                       ^               |                 |             |
///                       +---------------+  (failure)      |             |
///                       +---------------------------------+ (reauth)    |
///                                  authenticate / quick_authenticate <--+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initialized,
    Authenticating,
    Authenticated,
    SignedOut,
}

impl SessionState {
    pub fn is_initialized(&self) -> bool {
        !matches!(self, SessionState::Uninitialized)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Initialized => "Initialized",
            SessionState::Authenticating => "Authenticating",
            SessionState::Authenticated => "Authenticated",
            SessionState::SignedOut => "SignedOut",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("oid-1.tid-1", "adele@contoso.com")
    }

    #[test]
    fn test_credential_from_lifetime_uses_reported_expiry() {
        let issued = Utc::now();
        let credential =
            Credential::from_lifetime("token", issued, 4_399, account(), ["User.Read"]).unwrap();

        assert_eq!(credential.expires_at(), issued + ChronoDuration::seconds(4_399));
        assert_eq!(credential.account_identifier(), "oid-1.tid-1");
        assert!(credential.scopes().contains("User.Read"));
    }

    #[test]
    fn test_credential_rejects_non_positive_lifetime() {
        let result = Credential::from_lifetime("token", Utc::now(), 0, account(), ["User.Read"]);
        assert!(matches!(result, Err(AuthError::Unknown(_))));
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let credential = Credential::new(
            "token",
            now + ChronoDuration::minutes(10),
            account(),
            ["User.Read"],
        );

        assert!(credential.is_fresh_at(now, Duration::from_secs(300)));
        assert!(!credential.is_fresh_at(now, Duration::from_secs(600)));
        assert!(credential.is_valid_at(now + ChronoDuration::minutes(9)));
        assert!(!credential.is_valid_at(now + ChronoDuration::minutes(10)));
    }

    #[test]
    fn test_time_until_expiry() {
        let now = Utc::now();
        let credential = Credential::new(
            "token",
            now + ChronoDuration::minutes(2),
            account(),
            ["User.Read"],
        );

        assert_eq!(
            credential.time_until_expiry(now),
            Some(ChronoDuration::minutes(2))
        );
        assert_eq!(
            credential.time_until_expiry(now + ChronoDuration::minutes(3)),
            None
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credential = Credential::new("super-secret", Utc::now(), account(), ["User.Read"]);
        let grant = TokenGrant {
            credential: credential.clone(),
            refresh_token: Some("also-secret".to_string()),
        };

        let debug = format!("{:?} {:?}", credential, grant);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_challenge_instructions_and_launch_uri() {
        let mut challenge = DeviceCodeChallenge {
            attempt_id: AttemptId::new(),
            user_code: "F7Q2KLMN".to_string(),
            verification_uri: "https://microsoft.com/devicelogin".to_string(),
            verification_uri_complete: None,
            expires_at: Utc::now() + ChronoDuration::minutes(15),
            polling_interval: Duration::from_secs(5),
            message: None,
            device_code: "GAQABAAEAAAD".to_string(),
        };

        assert!(challenge.instructions().contains("F7Q2KLMN"));
        assert_eq!(challenge.launch_uri(), "https://microsoft.com/devicelogin");
        assert!(!format!("{:?}", challenge).contains("GAQABAAEAAAD"));

        challenge.message = Some("Custom instructions".to_string());
        challenge.verification_uri_complete =
            Some("https://microsoft.com/devicelogin?otc=F7Q2KLMN".to_string());
        assert_eq!(challenge.instructions(), "Custom instructions");
        assert!(challenge.launch_uri().ends_with("otc=F7Q2KLMN"));
    }

    #[test]
    fn test_session_state_display_and_predicates() {
        assert_eq!(SessionState::default(), SessionState::Uninitialized);
        assert!(!SessionState::Uninitialized.is_initialized());
        assert!(SessionState::SignedOut.is_initialized());
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(!SessionState::Authenticating.is_authenticated());
        assert_eq!(SessionState::Authenticating.to_string(), "Authenticating");
    }

    #[test]
    fn test_credential_serialization_round_trip() {
        let credential = Credential::new(
            "token",
            Utc::now() + ChronoDuration::hours(1),
            account(),
            ["Files.ReadWrite.All", "User.Read"],
        );
        let json = serde_json::to_string(&credential).unwrap();
        let back: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, credential);
    }
}
