use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use pulseboard_api_client::ApiClient;
use pulseboard_core_types::{ProjectId, SyncError};
use pulseboard_event_bus::{DispatchBus, EventKind, SubscriptionId};
use pulseboard_read_cache::{CacheKey, CacheStats, ReadThroughCache};
use serde_json::Value;
use tracing::debug;

pub const DASHBOARD_RESOURCE: &str = "dashboard";

/// Pushed events that make a cached summary stale.
pub const INVALIDATING_KINDS: [EventKind; 5] = [
    EventKind::MetricsUpdate,
    EventKind::UsageUpdate,
    EventKind::FlowCompleted,
    EventKind::FlowFailed,
    EventKind::CostAlert,
];

#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn fetch_summary(&self, scope: Option<&ProjectId>) -> Result<Value, SyncError>;
}

#[async_trait]
impl SummarySource for ApiClient {
    async fn fetch_summary(&self, scope: Option<&ProjectId>) -> Result<Value, SyncError> {
        self.dashboard_summary(scope).await.map_err(SyncError::from)
    }
}

#[async_trait]
impl<S> SummarySource for Arc<S>
where
    S: SummarySource + ?Sized,
{
    async fn fetch_summary(&self, scope: Option<&ProjectId>) -> Result<Value, SyncError> {
        (**self).fetch_summary(scope).await
    }
}

/// Dashboard summary reads, memoized per project scope.
pub struct DashboardService<S> {
    source: S,
    cache: ReadThroughCache<Value>,
    scope: RwLock<Option<ProjectId>>,
}

impl<S> DashboardService<S>
where
    S: SummarySource,
{
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            cache: ReadThroughCache::new(ttl),
            scope: RwLock::new(None),
        }
    }

    pub fn scope(&self) -> Option<ProjectId> {
        self.scope.read().clone()
    }

    /// Changes the selected project and drops every cached summary.
    pub fn set_scope(&self, scope: Option<ProjectId>) {
        let changed = {
            let mut current = self.scope.write();
            let changed = *current != scope;
            *current = scope;
            changed
        };
        if changed {
            self.invalidate();
        }
    }

    pub async fn summary(&self, scope: Option<&ProjectId>) -> Result<Value, SyncError> {
        let key = CacheKey::scoped(DASHBOARD_RESOURCE, scope.map(ProjectId::as_str));
        self.cache
            .get(key.as_str(), || self.source.fetch_summary(scope))
            .await
    }

    /// Summary for the currently selected scope.
    pub async fn current(&self) -> Result<Value, SyncError> {
        let scope = self.scope();
        self.summary(scope.as_ref()).await
    }

    /// Drops every cached summary and refetches the current scope.
    pub async fn refresh(&self) -> Result<Value, SyncError> {
        self.invalidate();
        self.current().await
    }

    pub fn invalidate(&self) {
        let removed = self
            .cache
            .invalidate_prefix(&CacheKey::prefix(DASHBOARD_RESOURCE));
        debug!(target: "state-center", removed, "dashboard cache invalidated");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<S> DashboardService<S>
where
    S: SummarySource + 'static,
{
    /// Invalidates cached summaries whenever the stream reports a change that
    /// affects them.
    pub fn attach_invalidation(
        self: &Arc<Self>,
        bus: &DispatchBus,
    ) -> Vec<(EventKind, SubscriptionId)> {
        let service: Weak<Self> = Arc::downgrade(self);
        bus.subscribe_many(&INVALIDATING_KINDS, move |envelope| {
            if let Some(service) = service.upgrade() {
                debug!(target: "state-center", kind = envelope.kind.as_str(), "push event invalidates dashboard");
                service.invalidate();
            }
        })
    }
}
