//! Bearer token storage shared by the REST layer and the stream client.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::SyncError;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Where the current credentials live. Persisting them is the embedder's concern.
pub trait TokenStore: Send + Sync {
    fn tokens(&self) -> Option<TokenPair>;
    fn store(&self, tokens: TokenPair);
    fn clear(&self);

    /// An empty access token counts as none, e.g. a refresh-token-only login.
    fn access_token(&self) -> Option<String> {
        self.tokens()
            .map(|pair| pair.access_token)
            .filter(|token| !token.is_empty())
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens().and_then(|pair| pair.refresh_token)
    }
}

/// Obtains a replacement bearer after `stale` was rejected.
///
/// Long-lived connections call this on a 401 instead of retrying with the
/// same credentials.
#[async_trait]
pub trait TokenRefreshHook: Send + Sync {
    async fn refresh_token(&self, stale: Option<&str>) -> Result<String, SyncError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new(tokens: Option<TokenPair>) -> Self {
        Self {
            inner: RwLock::new(tokens),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn tokens(&self) -> Option<TokenPair> {
        self.inner.read().clone()
    }

    fn store(&self, tokens: TokenPair) {
        *self.inner.write() = Some(tokens);
    }

    fn clear(&self) {
        self.inner.write().take();
    }
}
