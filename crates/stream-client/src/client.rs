use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pulseboard_core_types::{TokenPair, TokenRefreshHook, TokenStore};
use pulseboard_event_bus::{parse_frame, DispatchBus, EventEnvelope, EventKind, SubscriptionId};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::metrics::{StreamCounters, StreamMetricsSnapshot};
use crate::transport::{FrameSource, StreamTransport};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    /// Closed on request through `disconnect`.
    Closed,
    /// Retry budget exhausted; only an explicit `connect` restarts the stream.
    Failed,
}

/// What connection-state listeners observe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Failed { attempts: u32 },
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

pub type ConnectionListener = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

struct Session {
    state: StreamState,
    endpoint: Option<Url>,
    token: Option<String>,
    attempts: u32,
    generation: u64,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: StreamState::Idle,
            endpoint: None,
            token: None,
            attempts: 0,
            generation: 0,
            cancel: None,
            worker: None,
        }
    }
}

enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    Stale,
}

enum PumpOutcome {
    Cancelled,
    Ended,
    Failed(StreamError),
}

struct Inner {
    transport: Arc<dyn StreamTransport>,
    config: StreamConfig,
    bus: Arc<DispatchBus>,
    listeners: RwLock<Vec<(ListenerId, ConnectionListener)>>,
    next_listener: AtomicU64,
    session: Mutex<Session>,
    token_store: RwLock<Option<Arc<dyn TokenStore>>>,
    refresh_hook: RwLock<Option<Arc<dyn TokenRefreshHook>>>,
    counters: StreamCounters,
}

/// Owns one logical push connection and feeds every frame into a [`DispatchBus`].
///
/// Lifecycle: `new → connect → … → disconnect`. Cloning shares the same connection.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl StreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>, config: StreamConfig) -> Self {
        let bus = DispatchBus::new(config.tap_capacity);
        Self::with_bus(transport, config, bus)
    }

    pub fn with_bus(
        transport: Arc<dyn StreamTransport>,
        config: StreamConfig,
        bus: Arc<DispatchBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                bus,
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                session: Mutex::new(Session::default()),
                token_store: RwLock::new(None),
                refresh_hook: RwLock::new(None),
                counters: StreamCounters::default(),
            }),
        }
    }

    /// Reads the bearer from `store` on every (re)connect, so a refreshed token
    /// is picked up by the next attempt.
    pub fn with_token_store(self, store: Arc<dyn TokenStore>) -> Self {
        *self.inner.token_store.write() = Some(store);
        self
    }

    /// Asked for a new token whenever the endpoint rejects the current one.
    /// Without a hook an unauthorized open is retried like any other failure.
    pub fn with_refresh_hook(self, hook: Arc<dyn TokenRefreshHook>) -> Self {
        *self.inner.refresh_hook.write() = Some(hook);
        self
    }

    pub fn bus(&self) -> Arc<DispatchBus> {
        Arc::clone(&self.inner.bus)
    }

    pub fn state(&self) -> StreamState {
        self.inner.session.lock().state
    }

    pub fn metrics(&self) -> StreamMetricsSnapshot {
        self.inner.counters.snapshot()
    }

    /// Opens the connection. A no-op while already connecting or open.
    ///
    /// With a token store attached, the stored access token takes precedence
    /// over `auth_token`, which is only used while the store is empty.
    pub fn connect(&self, endpoint: &str, auth_token: impl Into<String>) -> Result<(), StreamError> {
        let endpoint =
            Url::parse(endpoint).map_err(|err| StreamError::InvalidEndpoint(err.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StreamError::NoRuntime)?;
        let token = auth_token.into();

        let mut session = self.inner.session.lock();
        if matches!(session.state, StreamState::Connecting | StreamState::Open) {
            debug!(target: "stream-client", "connect ignored; stream already active");
            return Ok(());
        }
        if let Some(stale) = session.worker.take() {
            stale.abort();
        }

        session.generation += 1;
        session.attempts = 0;
        session.state = StreamState::Connecting;
        session.endpoint = Some(endpoint);
        session.token = (!token.is_empty()).then_some(token);
        let cancel = CancellationToken::new();
        session.cancel = Some(cancel.clone());

        let inner = Arc::clone(&self.inner);
        let generation = session.generation;
        session.worker = Some(runtime.spawn(run_supervisor(inner, generation, cancel)));
        Ok(())
    }

    /// Replaces the token used for subsequent reconnects. With a token store
    /// attached the token is written through to it, keeping the refresh token.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        if !token.is_empty() {
            if let Some(store) = self.inner.token_store.read().as_ref() {
                store.store(TokenPair::new(token.clone(), store.refresh_token()));
            }
        }
        self.inner.session.lock().token = (!token.is_empty()).then_some(token);
    }

    /// Tears down the connection, pending reconnect timers, every subscription
    /// and every connection listener. Safe to call repeatedly.
    pub fn disconnect(&self) {
        {
            let mut session = self.inner.session.lock();
            session.generation += 1;
            if let Some(cancel) = session.cancel.take() {
                cancel.cancel();
            }
            if let Some(worker) = session.worker.take() {
                worker.abort();
            }
            session.attempts = 0;
            if session.state != StreamState::Idle {
                session.state = StreamState::Closed;
            }
        }
        self.inner.bus.clear();
        self.inner.listeners.write().clear();
        debug!(target: "stream-client", "stream disconnected");
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(kind, id)
    }

    pub fn on_connection_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().generation == generation
    }

    /// The URL for the next attempt and the bearer it carries.
    fn current_url(&self, generation: u64) -> Option<(Url, Option<String>)> {
        let stored = self
            .token_store
            .read()
            .as_ref()
            .and_then(|store| store.access_token());
        let mut session = self.session.lock();
        if session.generation != generation {
            return None;
        }
        session.state = StreamState::Connecting;
        let mut url = session.endpoint.clone()?;
        let token = stored.or_else(|| session.token.clone());
        if let Some(token) = &token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Some((url, token))
    }

    /// Asks the refresh hook for a replacement after `stale` was rejected.
    /// `false` means the session cannot be renewed and the stream should stop.
    async fn renew_token(
        &self,
        generation: u64,
        stale: Option<&str>,
        cancel: &CancellationToken,
    ) -> bool {
        let hook = self.refresh_hook.read().clone();
        let Some(hook) = hook else {
            return true;
        };
        let renewed = tokio::select! {
            _ = cancel.cancelled() => return true,
            renewed = hook.refresh_token(stale) => renewed,
        };
        match renewed {
            Ok(token) => {
                let mut session = self.session.lock();
                if session.generation == generation {
                    session.token = (!token.is_empty()).then_some(token);
                }
                debug!(target: "stream-client", "stream token renewed");
                true
            }
            Err(err) => {
                warn!(target: "stream-client", error = %err, "stream token refresh failed");
                false
            }
        }
    }

    fn mark_failed(&self, generation: u64) -> Option<u32> {
        let mut session = self.session.lock();
        if session.generation != generation {
            return None;
        }
        session.state = StreamState::Failed;
        session.cancel = None;
        Some(session.attempts)
    }

    fn mark_open(&self, generation: u64) -> bool {
        {
            let mut session = self.session.lock();
            if session.generation != generation {
                return false;
            }
            session.state = StreamState::Open;
            session.attempts = 0;
        }
        self.counters.record_opened();
        info!(target: "stream-client", "stream connected");
        self.notify(ConnectionStatus::Connected);
        true
    }

    fn next_retry(&self, generation: u64) -> RetryDecision {
        let mut session = self.session.lock();
        if session.generation != generation {
            return RetryDecision::Stale;
        }
        if session.attempts >= self.config.max_attempts {
            session.state = StreamState::Failed;
            session.cancel = None;
            return RetryDecision::Exhausted {
                attempts: session.attempts,
            };
        }
        session.attempts += 1;
        session.state = StreamState::Connecting;
        RetryDecision::Retry {
            attempt: session.attempts,
            delay: self.config.delay_for(session.attempts),
        }
    }

    fn notify(&self, status: ConnectionStatus) {
        let snapshot: Vec<ConnectionListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            if panic::catch_unwind(panic::AssertUnwindSafe(|| listener(status))).is_err() {
                warn!(target: "stream-client", ?status, "connection listener panicked; continuing");
            }
        }
    }

    fn handle_frame(&self, line: &str) {
        match parse_frame(line) {
            Ok(Some(envelope)) => {
                self.counters.record_frame();
                self.bus.dispatch(&envelope);
            }
            Ok(None) => {}
            Err(err) => {
                self.counters.record_dropped();
                warn!(target: "stream-client", error = %err, "dropping stream frame");
            }
        }
    }

    async fn pump(&self, source: &mut dyn FrameSource, cancel: &CancellationToken) -> PumpOutcome {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return PumpOutcome::Cancelled,
                frame = source.next_frame() => frame,
            };
            match frame {
                Some(Ok(line)) => self.handle_frame(&line),
                Some(Err(err)) => return PumpOutcome::Failed(err),
                None => return PumpOutcome::Ended,
            }
        }
    }
}

async fn run_supervisor(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    loop {
        let Some((url, token)) = inner.current_url(generation) else {
            return;
        };

        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = inner.transport.open(&url) => opened,
        };

        match opened {
            Ok(mut source) => {
                if !inner.mark_open(generation) {
                    return;
                }
                match inner.pump(source.as_mut(), &cancel).await {
                    PumpOutcome::Cancelled => return,
                    PumpOutcome::Ended => {
                        warn!(target: "stream-client", "stream closed by server");
                    }
                    PumpOutcome::Failed(err) => {
                        warn!(target: "stream-client", error = %err, "stream transport failed");
                    }
                }
            }
            Err(StreamError::Unauthorized) => {
                warn!(target: "stream-client", "stream rejected the bearer token");
                if !inner.renew_token(generation, token.as_deref(), &cancel).await {
                    if let Some(attempts) = inner.mark_failed(generation) {
                        inner.notify(ConnectionStatus::Failed { attempts });
                    }
                    return;
                }
            }
            Err(err) => {
                warn!(target: "stream-client", error = %err, "stream open failed");
            }
        }

        if cancel.is_cancelled() || !inner.is_current(generation) {
            return;
        }
        inner.notify(ConnectionStatus::Disconnected);

        match inner.next_retry(generation) {
            RetryDecision::Retry { attempt, delay } => {
                inner.counters.record_reconnect();
                info!(
                    target: "stream-client",
                    attempt,
                    max_attempts = inner.config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling stream reconnect"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
            }
            RetryDecision::Exhausted { attempts } => {
                warn!(target: "stream-client", attempts, "stream reconnect budget exhausted");
                inner.notify(ConnectionStatus::Failed { attempts });
                return;
            }
            RetryDecision::Stale => return,
        }
    }
}
