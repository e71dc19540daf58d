use std::fmt;
use std::str::FromStr;

use pulseboard_core_types::SubjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Closed set of event kinds pushed by the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    FlowStarted,
    FlowCompleted,
    FlowFailed,
    MetricsUpdate,
    InterventionApplied,
    Optimization,
    CostAlert,
    UsageUpdate,
    Connected,
    Heartbeat,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::FlowStarted,
        EventKind::FlowCompleted,
        EventKind::FlowFailed,
        EventKind::MetricsUpdate,
        EventKind::InterventionApplied,
        EventKind::Optimization,
        EventKind::CostAlert,
        EventKind::UsageUpdate,
        EventKind::Connected,
        EventKind::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::FlowStarted => "flow-started",
            EventKind::FlowCompleted => "flow-completed",
            EventKind::FlowFailed => "flow-failed",
            EventKind::MetricsUpdate => "metrics-update",
            EventKind::InterventionApplied => "intervention-applied",
            EventKind::Optimization => "optimization",
            EventKind::CostAlert => "cost-alert",
            EventKind::UsageUpdate => "usage-update",
            EventKind::Connected => "connected",
            EventKind::Heartbeat => "heartbeat",
        }
    }

    /// Kinds that describe the lifecycle of a single flow.
    pub fn is_flow_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::FlowStarted | EventKind::FlowCompleted | EventKind::FlowFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| FrameError::UnknownKind(value.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub kind: EventKind,
    #[serde(
        rename = "subjectId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub subject_id: Option<SubjectId>,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, subject_id: Option<SubjectId>, payload: Value) -> Self {
        Self {
            kind,
            subject_id,
            payload,
        }
    }

    pub fn for_subject(kind: EventKind, subject: impl Into<SubjectId>, payload: Value) -> Self {
        Self::new(kind, Some(subject.into()), payload)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no event kind")]
    MissingKind,
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
}

const KIND_FIELDS: [&str; 2] = ["kind", "type"];
const SUBJECT_FIELDS: [&str; 4] = ["subjectId", "subject_id", "flowId", "flow_id"];
const PAYLOAD_FIELDS: [&str; 2] = ["payload", "data"];

/// Parses one line of the push stream.
///
/// Returns `Ok(None)` for lines that carry no event: blank keep-alives and SSE
/// control lines (`event:`, `id:`, `retry:`, `:` comments). A leading `data:`
/// prefix is stripped so the same parser serves both NDJSON and SSE bodies.
pub fn parse_frame(line: &str) -> Result<Option<EventEnvelope>, FrameError> {
    let mut text = line.trim();
    if text.is_empty() || text.starts_with(':') {
        return Ok(None);
    }
    if let Some(rest) = text.strip_prefix("data:") {
        text = rest.trim_start();
    } else if ["event:", "id:", "retry:"]
        .iter()
        .any(|prefix| text.starts_with(prefix))
    {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|err| FrameError::Malformed(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(FrameError::NotAnObject);
    };

    let kind = first_string(&object, &KIND_FIELDS).ok_or(FrameError::MissingKind)?;
    let kind = kind.parse::<EventKind>()?;
    let subject_id = first_string(&object, &SUBJECT_FIELDS).map(SubjectId::from);
    let payload = take_first(&mut object, &PAYLOAD_FIELDS).unwrap_or(Value::Null);

    Ok(Some(EventEnvelope {
        kind,
        subject_id,
        payload,
    }))
}

fn first_string(object: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match object.get(*field) {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        _ => None,
    })
}

fn take_first(object: &mut Map<String, Value>, fields: &[&str]) -> Option<Value> {
    fields.iter().find_map(|field| object.remove(*field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ndjson_frame() {
        let envelope = parse_frame(r#"{"kind":"flow-started","subjectId":"f1","payload":{"name":"etl"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(envelope.kind, EventKind::FlowStarted);
        assert_eq!(envelope.subject_id, Some(SubjectId::from("f1")));
        assert_eq!(envelope.payload, json!({"name": "etl"}));
    }

    #[test]
    fn accepts_type_and_data_aliases() {
        let envelope = parse_frame(r#"data: {"type":"metrics_update","flow_id":"f9","data":[1,2]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(envelope.kind, EventKind::MetricsUpdate);
        assert_eq!(envelope.subject_id.as_ref().map(|s| s.as_str()), Some("f9"));
        assert_eq!(envelope.payload, json!([1, 2]));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let envelope = parse_frame(r#"{"kind":"flow-completed","subjectId":"f1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(envelope.payload, Value::Null);
    }

    #[test]
    fn control_lines_carry_no_event() {
        assert_eq!(parse_frame("").unwrap(), None);
        assert_eq!(parse_frame("   ").unwrap(), None);
        assert_eq!(parse_frame(": keep-alive").unwrap(), None);
        assert_eq!(parse_frame("event: message").unwrap(), None);
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(parse_frame("{not json"), Err(FrameError::Malformed(_))));
        assert_eq!(parse_frame("[1,2]"), Err(FrameError::NotAnObject));
        assert_eq!(parse_frame(r#"{"payload":1}"#), Err(FrameError::MissingKind));
        assert_eq!(
            parse_frame(r#"{"kind":"bogus"}"#),
            Err(FrameError::UnknownKind("bogus".into()))
        );
    }

    #[test]
    fn kind_wire_names_match_serde() {
        for kind in EventKind::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, Value::String(kind.as_str().to_string()));
        }
    }
}
