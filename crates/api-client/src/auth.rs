use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulseboard_core_types::{SyncError, TokenPair, TokenRefreshHook, TokenStore};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ApiError, AuthError};

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogoutReason {
    /// The refresh attempt failed; the stored credentials were cleared.
    SessionExpired(AuthError),
    Requested,
}

type Waiter = oneshot::Sender<Result<String, AuthError>>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<Waiter>,
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<Result<String, AuthError>>),
}

/// Owns the credentials and guarantees at most one refresh in flight.
pub struct AuthSession {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    state: Mutex<RefreshState>,
    logout: broadcast::Sender<LogoutReason>,
    refreshes: AtomicU64,
}

impl AuthSession {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        let (logout, _) = broadcast::channel(8);
        Self {
            store,
            refresher,
            state: Mutex::new(RefreshState::default()),
            logout,
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.store)
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    /// Number of refresh requests actually sent.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn subscribe_logout(&self) -> broadcast::Receiver<LogoutReason> {
        self.logout.subscribe()
    }

    pub fn logout(&self) {
        self.store.clear();
        let _ = self.logout.send(LogoutReason::Requested);
        info!(target: "api-client", "session logged out");
    }

    /// Called after a request sent with `stale` came back 401. Resolves to the
    /// token the request should be replayed with.
    ///
    /// If the store already holds a different token, another caller refreshed
    /// in the meantime and that token is returned directly. Otherwise the first
    /// caller performs the refresh and every concurrent caller waits for its
    /// outcome.
    pub async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> Result<String, AuthError> {
        let role = {
            let mut state = self.state.lock();
            if let Some(current) = self.store.access_token() {
                if stale != Some(current.as_str()) {
                    return Ok(current);
                }
            }
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Role::Waiter(rx)
            } else {
                state.in_flight = true;
                Role::Leader
            }
        };

        match role {
            Role::Waiter(rx) => {
                debug!(target: "api-client", "waiting on in-flight token refresh");
                rx.await.unwrap_or(Err(AuthError::Abandoned))
            }
            Role::Leader => {
                let mut flight = RefreshFlight {
                    session: self,
                    finished: false,
                };
                let outcome = self.perform_refresh().await;
                flight.finish(outcome.clone());
                outcome
            }
        }
    }

    async fn perform_refresh(&self) -> Result<String, AuthError> {
        let Some(refresh_token) = self.store.refresh_token() else {
            self.expire(AuthError::NoRefreshToken);
            return Err(AuthError::NoRefreshToken);
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!(target: "api-client", "refreshing access token");

        match self.refresher.refresh(&refresh_token).await {
            Ok(mut pair) => {
                if pair.refresh_token.is_none() {
                    pair.refresh_token = Some(refresh_token);
                }
                let access = pair.access_token.clone();
                self.store.store(pair);
                info!(target: "api-client", "access token refreshed");
                Ok(access)
            }
            Err(err) => {
                self.expire(err.clone());
                Err(err)
            }
        }
    }

    fn expire(&self, cause: AuthError) {
        warn!(target: "api-client", error = %cause, "token refresh failed; logging out");
        self.store.clear();
        let _ = self.logout.send(LogoutReason::SessionExpired(cause));
    }

    fn settle(&self, outcome: Result<String, AuthError>) {
        let waiters = {
            let mut state = self.state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(target: "api-client", waiters = waiters.len(), "releasing refresh waiters");
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Lets long-lived connections (the push stream) share the REST refresh flight.
#[async_trait]
impl TokenRefreshHook for AuthSession {
    async fn refresh_token(&self, stale: Option<&str>) -> Result<String, SyncError> {
        self.refresh_after_unauthorized(stale)
            .await
            .map_err(|err| SyncError::from(ApiError::from(err)))
    }
}

/// Resets the refresh state even if the leading caller is dropped mid-flight.
struct RefreshFlight<'a> {
    session: &'a AuthSession,
    finished: bool,
}

impl RefreshFlight<'_> {
    fn finish(&mut self, outcome: Result<String, AuthError>) {
        self.finished = true;
        self.session.settle(outcome);
    }
}

impl Drop for RefreshFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.settle(Err(AuthError::Abandoned));
        }
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token body returned by the refresh, login and MFA endpoints.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "token", alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

impl From<TokenResponse> for TokenPair {
    fn from(value: TokenResponse) -> Self {
        TokenPair::new(value.access_token, value.refresh_token)
    }
}

/// `POST /auth/refresh` with `{ "refresh_token": ... }`.
pub struct HttpTokenRefresher {
    client: Client,
    endpoint: Url,
}

impl HttpTokenRefresher {
    pub fn new(client: Client, config: &ApiConfig) -> Result<Self, ApiError> {
        Ok(Self {
            client,
            endpoint: config.endpoint(&["auth", "refresh"])?,
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(AuthError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Decode(err.to_string()))?;
        Ok(body.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulseboard_core_types::MemoryTokenStore;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct GatedRefresher {
        calls: AtomicUsize,
        gate: Notify,
        outcome: Result<TokenPair, AuthError>,
    }

    impl GatedRefresher {
        fn new(outcome: Result<TokenPair, AuthError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
                outcome,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
            assert_eq!(refresh_token, "r1");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        }
    }

    fn session(refresher: Arc<GatedRefresher>) -> (Arc<AuthSession>, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new(Some(TokenPair::new(
            "stale",
            Some("r1".into()),
        ))));
        let session = Arc::new(AuthSession::new(store.clone(), refresher));
        (session, store)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let refresher = GatedRefresher::new(Ok(TokenPair::new("fresh", None)));
        let (session, store) = session(refresher.clone());

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.refresh_after_unauthorized(Some("stale")).await })
            })
            .collect();

        while refresher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // Let the other callers queue up behind the leader.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        refresher.gate.notify_one();

        for caller in callers {
            assert_eq!(caller.await.unwrap(), Ok("fresh".to_string()));
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.refresh_count(), 1);
        let stored = store.tokens().unwrap();
        assert_eq!(stored.access_token, "fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn newer_stored_token_skips_refresh() {
        let refresher = GatedRefresher::new(Ok(TokenPair::new("unused", None)));
        let (session, store) = session(refresher.clone());
        store.store(TokenPair::new("rotated", Some("r1".into())));

        let token = session.refresh_after_unauthorized(Some("stale")).await;
        assert_eq!(token, Ok("rotated".to_string()));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_refresh_clears_store_and_broadcasts_logout() {
        let refresher = GatedRefresher::new(Err(AuthError::Rejected));
        let (session, store) = session(refresher.clone());
        let mut logout = session.subscribe_logout();

        refresher.gate.notify_one();
        let outcome = session.refresh_after_unauthorized(Some("stale")).await;

        assert_eq!(outcome, Err(AuthError::Rejected));
        assert!(store.tokens().is_none());
        assert_eq!(
            logout.recv().await.unwrap(),
            LogoutReason::SessionExpired(AuthError::Rejected)
        );
    }

    #[tokio::test]
    async fn missing_refresh_token_logs_out_without_calling_refresher() {
        let refresher = GatedRefresher::new(Ok(TokenPair::new("fresh", None)));
        let store = Arc::new(MemoryTokenStore::new(Some(TokenPair::new("stale", None))));
        let session = AuthSession::new(store.clone(), refresher.clone());

        let outcome = session.refresh_after_unauthorized(Some("stale")).await;
        assert_eq!(outcome, Err(AuthError::NoRefreshToken));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(store.tokens().is_none());
    }

    #[tokio::test]
    async fn refresh_hook_shares_the_session_flight() {
        let refresher = GatedRefresher::new(Ok(TokenPair::new("fresh", None)));
        let (session, _store) = session(refresher.clone());
        let hook: Arc<dyn TokenRefreshHook> = session.clone();

        refresher.gate.notify_one();
        assert_eq!(hook.refresh_token(Some("stale")).await, Ok("fresh".to_string()));
        assert_eq!(session.refresh_count(), 1);

        let empty = Arc::new(MemoryTokenStore::new(Some(TokenPair::new("stale", None))));
        let expired: Arc<dyn TokenRefreshHook> =
            Arc::new(AuthSession::new(empty, refresher.clone()));
        assert_eq!(
            expired.refresh_token(Some("stale")).await,
            Err(SyncError::SessionExpired)
        );
    }

    #[tokio::test]
    async fn dropped_leader_releases_waiters() {
        let refresher = GatedRefresher::new(Ok(TokenPair::new("fresh", None)));
        let (session, _store) = session(refresher.clone());

        let leader = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.refresh_after_unauthorized(Some("stale")).await })
        };
        while refresher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.refresh_after_unauthorized(Some("stale")).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        assert_eq!(waiter.await.unwrap(), Err(AuthError::Abandoned));
        assert!(!session.state.lock().in_flight);
    }
}
