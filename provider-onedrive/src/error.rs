use core_auth::AuthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OneDriveError {
    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Throttled, retry after {0} seconds")]
    Throttled(u64),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication failed: {0}")]
    Auth(AuthError),

    #[error("Transport error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

impl From<AuthError> for OneDriveError {
    fn from(error: AuthError) -> Self {
        if error.requires_interaction() {
            OneDriveError::AuthRequired
        } else {
            OneDriveError::Auth(error)
        }
    }
}

pub type Result<T> = std::result::Result<T, OneDriveError>;
