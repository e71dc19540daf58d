use pulseboard_core_types::SyncError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("no async runtime available to drive the stream")]
    NoRuntime,
    #[error("stream transport failure: {0}")]
    Transport(String),
    #[error("stream rejected the bearer token")]
    Unauthorized,
    #[error("stream endpoint answered with status {0}")]
    Status(u16),
}

impl From<StreamError> for SyncError {
    fn from(value: StreamError) -> Self {
        match value {
            StreamError::Unauthorized => SyncError::Unauthorized,
            StreamError::Status(status) => SyncError::Http {
                status,
                message: "stream endpoint rejected connection".into(),
            },
            StreamError::Transport(message) => SyncError::Transport(message),
            other => SyncError::internal(other.to_string()),
        }
    }
}
