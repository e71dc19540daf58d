use std::collections::HashMap;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::envelope::{EventEnvelope, EventKind};

pub type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of a single dispatch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub panicked: usize,
}

/// Registry mapping event kind to interested handlers.
///
/// Handlers run synchronously on the caller's task, in registration order. The
/// handler list is snapshotted before invocation, so a handler may subscribe or
/// unsubscribe (itself included) without affecting the dispatch in progress.
pub struct DispatchBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<EventEnvelope>,
}

impl DispatchBus {
    pub fn new(tap_capacity: usize) -> Arc<Self> {
        let (tap, _) = broadcast::channel(tap_capacity.max(1));
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tap,
        })
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Registers the same handler for several kinds.
    pub fn subscribe_many<F>(&self, kinds: &[EventKind], handler: F) -> Vec<(EventKind, SubscriptionId)>
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let shared: Handler = Arc::new(handler);
        kinds
            .iter()
            .map(|kind| {
                let handler = Arc::clone(&shared);
                (*kind, self.subscribe(*kind, move |event| handler(event)))
            })
            .collect()
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut guard = self.handlers.write();
        let Some(list) = guard.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            guard.remove(&kind);
        }
        removed
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Receiver mirroring every dispatched envelope, for consumers that prefer
    /// awaiting events over registering callbacks.
    pub fn tap(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tap.subscribe()
    }

    pub fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        let snapshot: Vec<Handler> = self
            .handlers
            .read()
            .get(&envelope.kind)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for handler in snapshot {
            report.invoked += 1;
            if panic::catch_unwind(panic::AssertUnwindSafe(|| handler(envelope))).is_err() {
                report.panicked += 1;
                warn!(
                    target: "event-bus",
                    kind = %envelope.kind,
                    subject = envelope.subject_id.as_ref().map(|s| s.as_str()),
                    "event handler panicked; continuing"
                );
            }
        }
        if report.invoked == 0 {
            debug!(target: "event-bus", kind = %envelope.kind, "no handlers for event");
        }
        let _ = self.tap.send(envelope.clone());
        report
    }
}

impl std::fmt::Debug for DispatchBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .handlers
            .read()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("DispatchBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn flow(kind: EventKind, subject: &str, seq: u64) -> EventEnvelope {
        EventEnvelope::for_subject(kind, subject, json!({ "seq": seq }))
    }

    #[test]
    fn delivers_to_every_handler_for_kind() {
        let bus = DispatchBus::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::FlowStarted, move |_| seen.lock().push(tag));
        }
        let other = Arc::new(Mutex::new(0));
        {
            let other = Arc::clone(&other);
            bus.subscribe(EventKind::CostAlert, move |_| *other.lock() += 1);
        }

        let report = bus.dispatch(&flow(EventKind::FlowStarted, "f1", 1));
        assert_eq!(report.invoked, 2);
        assert_eq!(*seen.lock(), vec!["a", "b"]);
        assert_eq!(*other.lock(), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = DispatchBus::new(8);
        let hits = Arc::new(Mutex::new(0));
        bus.subscribe(EventKind::MetricsUpdate, |_| panic!("handler bug"));
        {
            let hits = Arc::clone(&hits);
            bus.subscribe(EventKind::MetricsUpdate, move |_| *hits.lock() += 1);
        }

        let report = bus.dispatch(&EventEnvelope::new(EventKind::MetricsUpdate, None, json!({})));
        assert_eq!(report.invoked, 2);
        assert_eq!(report.panicked, 1);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself_mid_dispatch() {
        let bus = DispatchBus::new(8);
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));
        let id = {
            let bus_ref = Arc::clone(&bus);
            let own_id = Arc::clone(&own_id);
            let calls = Arc::clone(&calls);
            bus.subscribe(EventKind::FlowCompleted, move |_| {
                *calls.lock() += 1;
                let current = *own_id.lock();
                if let Some(id) = current {
                    bus_ref.unsubscribe(EventKind::FlowCompleted, id);
                }
            })
        };
        *own_id.lock() = Some(id);
        let later = Arc::new(Mutex::new(0));
        {
            let later = Arc::clone(&later);
            bus.subscribe(EventKind::FlowCompleted, move |_| *later.lock() += 1);
        }

        bus.dispatch(&flow(EventKind::FlowCompleted, "f1", 1));
        bus.dispatch(&flow(EventKind::FlowCompleted, "f1", 2));

        assert_eq!(*calls.lock(), 1);
        assert_eq!(*later.lock(), 2);
        assert_eq!(bus.handler_count(EventKind::FlowCompleted), 1);
    }

    #[test]
    fn preserves_arrival_order_per_subject() {
        let bus = DispatchBus::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe_many(
                &[EventKind::FlowStarted, EventKind::FlowCompleted],
                move |event| seen.lock().push((event.kind, event.payload["seq"].as_u64())),
            );
        }
        bus.dispatch(&flow(EventKind::FlowStarted, "f1", 1));
        bus.dispatch(&flow(EventKind::FlowCompleted, "f1", 2));

        assert_eq!(
            *seen.lock(),
            vec![
                (EventKind::FlowStarted, Some(1)),
                (EventKind::FlowCompleted, Some(2))
            ]
        );
    }

    #[test]
    fn unsubscribe_and_clear() {
        let bus = DispatchBus::new(8);
        let id = bus.subscribe(EventKind::UsageUpdate, |_| {});
        assert!(bus.unsubscribe(EventKind::UsageUpdate, id));
        assert!(!bus.unsubscribe(EventKind::UsageUpdate, id));
        bus.subscribe(EventKind::UsageUpdate, |_| {});
        bus.clear();
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn tap_mirrors_dispatched_envelopes() {
        let bus = DispatchBus::new(8);
        let mut rx = bus.tap();
        bus.dispatch(&flow(EventKind::FlowStarted, "f2", 7));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.subject_id.unwrap().as_str(), "f2");
    }
}
