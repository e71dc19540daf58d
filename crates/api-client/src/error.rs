use pulseboard_core_types::SyncError;
use thiserror::Error;

/// Why a token refresh did not produce a new access token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no refresh token available")]
    NoRefreshToken,
    #[error("refresh token rejected")]
    Rejected,
    #[error("refresh request failed: {0}")]
    Transport(String),
    #[error("refresh endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("refresh response invalid: {0}")]
    Decode(String),
    #[error("refresh abandoned before completion")]
    Abandoned,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("session expired: {0}")]
    SessionExpired(#[source] AuthError),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("failed to encode request body: {0}")]
    Encode(String),
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        ApiError::SessionExpired(value)
    }
}

impl From<ApiError> for SyncError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::InvalidUrl(message) | ApiError::Encode(message) => SyncError::Internal(message),
            ApiError::Transport(message) => SyncError::Transport(message),
            ApiError::Status { status: 404, message } => SyncError::NotFound(message),
            ApiError::Status { status, message } => SyncError::Http { status, message },
            ApiError::Unauthorized => SyncError::Unauthorized,
            ApiError::SessionExpired(_) => SyncError::SessionExpired,
            ApiError::Decode(message) => SyncError::Decode(message),
        }
    }
}
