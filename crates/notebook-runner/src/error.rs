use pulseboard_core_types::{ExecutionId, SyncError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("notebook submission failed: {0}")]
    Submit(#[source] SyncError),
    #[error("execution {0} not found")]
    UnknownExecution(ExecutionId),
}

impl From<RunnerError> for SyncError {
    fn from(value: RunnerError) -> Self {
        match value {
            RunnerError::Submit(inner) => inner,
            RunnerError::UnknownExecution(id) => SyncError::NotFound(format!("execution {id}")),
        }
    }
}
