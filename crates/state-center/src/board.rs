use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use pulseboard_core_types::SubjectId;
use pulseboard_event_bus::{DispatchBus, EventEnvelope, EventKind, SubscriptionId};
use serde::Serialize;
use serde_json::{to_writer_pretty, Value};
use tracing::{debug, warn};

use crate::ring::BoundedRing;

const DEFAULT_ALERT_CAPACITY: usize = 50;
const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActiveFlow {
    pub id: SubjectId,
    pub payload: Value,
    pub started_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    pub payload: Value,
    pub observed_at_ms: u64,
}

impl ActivityEntry {
    fn from_envelope(envelope: &EventEnvelope) -> Self {
        Self {
            kind: envelope.kind,
            subject_id: envelope.subject_id.clone(),
            payload: envelope.payload.clone(),
            observed_at_ms: now_ms(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlowBoardStats {
    pub events_applied: u64,
    pub flows_started: u64,
    pub flows_completed: u64,
    pub flows_failed: u64,
    pub cost_alerts: u64,
    pub ignored: u64,
}

/// Point-in-time copy of the whole board.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub active: Vec<ActiveFlow>,
    pub latest_metrics: Option<Value>,
    pub latest_usage: Option<Value>,
    pub alerts: Vec<ActivityEntry>,
    pub activity: Vec<ActivityEntry>,
    pub stats: FlowBoardStats,
    pub last_heartbeat_ms: Option<u64>,
}

struct BoardState {
    active: BTreeMap<SubjectId, ActiveFlow>,
    latest_metrics: Option<Value>,
    latest_usage: Option<Value>,
    alerts: BoundedRing<ActivityEntry>,
    activity: BoundedRing<ActivityEntry>,
    stats: FlowBoardStats,
    last_heartbeat_ms: Option<u64>,
}

/// Reconciles pushed events into the set of flows currently running.
///
/// Envelopes are applied in the order the bus delivers them, so a
/// `flow-completed` always lands after the `flow-started` for the same subject.
pub struct FlowBoard {
    state: Mutex<BoardState>,
}

impl Default for FlowBoard {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl FlowBoard {
    pub fn new(alert_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            state: Mutex::new(BoardState {
                active: BTreeMap::new(),
                latest_metrics: None,
                latest_usage: None,
                alerts: BoundedRing::new(alert_capacity),
                activity: BoundedRing::new(activity_capacity),
                stats: FlowBoardStats::default(),
                last_heartbeat_ms: None,
            }),
        }
    }

    /// Subscribes to every event kind. The bus holds only a weak reference, so
    /// dropping the board silently ends the subscription.
    pub fn attach(self: &Arc<Self>, bus: &DispatchBus) -> Vec<(EventKind, SubscriptionId)> {
        let board: Weak<Self> = Arc::downgrade(self);
        bus.subscribe_many(&EventKind::ALL, move |envelope| {
            if let Some(board) = board.upgrade() {
                board.apply(envelope);
            }
        })
    }

    pub fn apply(&self, envelope: &EventEnvelope) {
        let mut state = self.state.lock();
        state.stats.events_applied += 1;
        match envelope.kind {
            EventKind::FlowStarted => {
                let Some(id) = envelope.subject_id.clone() else {
                    state.stats.ignored += 1;
                    warn!(target: "state-center", kind = envelope.kind.as_str(), "flow event without subject");
                    return;
                };
                state.stats.flows_started += 1;
                debug!(target: "state-center", flow = %id, "flow started");
                state.active.insert(
                    id.clone(),
                    ActiveFlow {
                        id,
                        payload: envelope.payload.clone(),
                        started_at_ms: now_ms(),
                    },
                );
            }
            EventKind::FlowCompleted | EventKind::FlowFailed => {
                let Some(id) = envelope.subject_id.as_ref() else {
                    state.stats.ignored += 1;
                    warn!(target: "state-center", kind = envelope.kind.as_str(), "flow event without subject");
                    return;
                };
                if envelope.kind == EventKind::FlowCompleted {
                    state.stats.flows_completed += 1;
                } else {
                    state.stats.flows_failed += 1;
                }
                if state.active.remove(id).is_none() {
                    debug!(target: "state-center", flow = %id, "finished flow was not tracked");
                }
            }
            EventKind::MetricsUpdate => state.latest_metrics = Some(envelope.payload.clone()),
            EventKind::UsageUpdate => state.latest_usage = Some(envelope.payload.clone()),
            EventKind::CostAlert => {
                state.stats.cost_alerts += 1;
                state.alerts.push(ActivityEntry::from_envelope(envelope));
            }
            EventKind::InterventionApplied | EventKind::Optimization => {
                state.activity.push(ActivityEntry::from_envelope(envelope));
            }
            EventKind::Heartbeat | EventKind::Connected => {
                state.last_heartbeat_ms = Some(now_ms());
            }
        }
    }

    pub fn active_flows(&self) -> Vec<ActiveFlow> {
        self.state.lock().active.values().cloned().collect()
    }

    pub fn is_active(&self, id: &SubjectId) -> bool {
        self.state.lock().active.contains_key(id)
    }

    pub fn latest_metrics(&self) -> Option<Value> {
        self.state.lock().latest_metrics.clone()
    }

    pub fn latest_usage(&self) -> Option<Value> {
        self.state.lock().latest_usage.clone()
    }

    pub fn recent_alerts(&self) -> Vec<ActivityEntry> {
        self.state.lock().alerts.snapshot()
    }

    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.state.lock().activity.snapshot()
    }

    pub fn stats(&self) -> FlowBoardStats {
        self.state.lock().stats.clone()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let state = self.state.lock();
        BoardSnapshot {
            active: state.active.values().cloned().collect(),
            latest_metrics: state.latest_metrics.clone(),
            latest_usage: state.latest_usage.clone(),
            alerts: state.alerts.snapshot(),
            activity: state.activity.snapshot(),
            stats: state.stats.clone(),
            last_heartbeat_ms: state.last_heartbeat_ms,
        }
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let snapshot = self.snapshot();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot).map_err(io::Error::other)?;
        writer.flush()?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn event(kind: EventKind, subject: &str, payload: Value) -> EventEnvelope {
        EventEnvelope::for_subject(kind, subject, payload)
    }

    #[test]
    fn lifecycle_adds_and_removes_flows() {
        let board = FlowBoard::default();
        board.apply(&event(EventKind::FlowStarted, "f1", json!({ "name": "ingest" })));
        board.apply(&event(EventKind::FlowStarted, "f2", json!({})));
        assert!(board.is_active(&SubjectId::from("f1")));

        board.apply(&event(EventKind::FlowCompleted, "f1", Value::Null));
        board.apply(&event(EventKind::FlowFailed, "f2", json!({ "error": "timeout" })));
        assert!(board.active_flows().is_empty());

        let stats = board.stats();
        assert_eq!(stats.flows_started, 2);
        assert_eq!(stats.flows_completed, 1);
        assert_eq!(stats.flows_failed, 1);
    }

    #[test]
    fn subjectless_lifecycle_events_are_ignored() {
        let board = FlowBoard::default();
        board.apply(&EventEnvelope::new(EventKind::FlowStarted, None, Value::Null));
        assert!(board.active_flows().is_empty());
        assert_eq!(board.stats().ignored, 1);
    }

    #[test]
    fn keeps_latest_metrics_and_bounded_alerts() {
        let board = FlowBoard::new(2, 2);
        board.apply(&EventEnvelope::new(EventKind::MetricsUpdate, None, json!({ "qps": 1 })));
        board.apply(&EventEnvelope::new(EventKind::MetricsUpdate, None, json!({ "qps": 2 })));
        board.apply(&EventEnvelope::new(EventKind::UsageUpdate, None, json!({ "tokens": 10 })));
        for usd in [1, 2, 3] {
            board.apply(&EventEnvelope::new(EventKind::CostAlert, None, json!({ "usd": usd })));
        }
        board.apply(&event(EventKind::Optimization, "f1", json!({ "saving": 0.2 })));

        assert_eq!(board.latest_metrics(), Some(json!({ "qps": 2 })));
        assert_eq!(board.latest_usage(), Some(json!({ "tokens": 10 })));
        let alerts: Vec<Value> = board.recent_alerts().into_iter().map(|a| a.payload).collect();
        assert_eq!(alerts, vec![json!({ "usd": 2 }), json!({ "usd": 3 })]);
        assert_eq!(board.stats().cost_alerts, 3);
        assert_eq!(board.recent_activity().len(), 1);
    }

    #[test]
    fn attach_follows_bus_dispatch() {
        let bus = DispatchBus::new(8);
        let board = Arc::new(FlowBoard::default());
        let subscriptions = board.attach(&bus);
        assert_eq!(subscriptions.len(), EventKind::ALL.len());

        bus.dispatch(&event(EventKind::FlowStarted, "f1", Value::Null));
        assert!(board.is_active(&SubjectId::from("f1")));
        bus.dispatch(&event(EventKind::FlowCompleted, "f1", Value::Null));
        assert!(!board.is_active(&SubjectId::from("f1")));

        drop(board);
        let report = bus.dispatch(&event(EventKind::FlowStarted, "f2", Value::Null));
        assert_eq!(report.panicked, 0);
    }

    #[test]
    fn writes_snapshot_json() {
        let board = FlowBoard::default();
        board.apply(&event(EventKind::FlowStarted, "f1", json!({ "name": "ingest" })));
        let file = NamedTempFile::new().unwrap();
        board.write_snapshot(file.path()).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(written["active"][0]["id"], "f1");
        assert_eq!(written["stats"]["flows_started"], 1);
    }
}
