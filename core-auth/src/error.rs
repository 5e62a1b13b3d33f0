use thiserror::Error;

/// Failures surfaced by the authentication core.
///
/// `Clone` so that every caller waiting on a shared refresh receives the
/// same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication manager is not initialized; call initialize() first")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("The identity provider rejected the app registration: {0}")]
    InvalidClient(String),

    #[error("The device code expired before the sign-in was approved")]
    Expired,

    /// Polling too fast. Handled inside the device-code loop, never returned
    /// from a public operation.
    #[error("Polling too fast; slow down")]
    SlowDown,

    #[error("Authentication was cancelled")]
    Cancelled,

    #[error("Interactive sign-in required: {0}")]
    ReauthRequired(String),

    #[error("The user declined the sign-in request")]
    AccessDenied,

    #[error("An interactive sign-in is already in progress")]
    AuthenticationInProgress,

    #[error("Persisted credentials are unreadable: {0}")]
    PersistenceCorrupt(String),

    #[error("Credential storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Authentication failed: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Whether retrying later, without user interaction, may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::ProviderUnavailable(_)
                | AuthError::StorageUnavailable(_)
                | AuthError::Unknown(_)
        )
    }

    /// Whether the only way forward is a new interactive sign-in.
    pub fn requires_interaction(&self) -> bool {
        matches!(
            self,
            AuthError::ReauthRequired(_) | AuthError::Expired | AuthError::AccessDenied
        )
    }
}

impl From<core_runtime::Error> for AuthError {
    fn from(error: core_runtime::Error) -> Self {
        match error {
            core_runtime::Error::Config(message) => AuthError::InvalidConfiguration(message),
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => AuthError::InvalidConfiguration(format!("{}: {}", capability, message)),
            core_runtime::Error::Internal(message) => AuthError::Unknown(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
