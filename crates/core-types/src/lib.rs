use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod auth;

pub use auth::{MemoryTokenStore, TokenPair, TokenRefreshHook, TokenStore};

/// Shared error type for the client core crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("session expired")]
    SessionExpired,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("remote failure: {0}")]
    Remote(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
}

impl SyncError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Network-level failures and 5xx responses; a later identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of the entity an event talks about (usually a flow id).
    SubjectId
);
string_id!(NotebookId);
string_id!(CellId);
string_id!(ExecutionId);
string_id!(ProjectId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_transparently() {
        let id = CellId::from("cell-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cell-1\"");
        let back: CellId = serde_json::from_str("\"cell-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn transient_classification() {
        assert!(SyncError::Transport("reset".into()).is_transient());
        assert!(SyncError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!SyncError::Http {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
        assert!(!SyncError::SessionExpired.is_transient());
    }
}
