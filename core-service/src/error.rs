use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("SDK initialization failed: {0}")]
    InitializationFailed(String),

    #[error("SDK already installed")]
    AlreadyInstalled,

    #[error("SDK not installed; call core_service::global::install first")]
    NotInstalled,

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("OneDrive error: {0}")]
    OneDrive(#[from] provider_onedrive::OneDriveError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
