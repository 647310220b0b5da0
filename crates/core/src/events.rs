use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dashboard data categories. Each category has its own snapshot endpoint
/// and its own delta event name; the mapping is 1:1 in both directions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Metrics,
    Prs,
    Runs,
    Findings,
    Policies,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Metrics,
        Category::Prs,
        Category::Runs,
        Category::Findings,
        Category::Policies,
    ];

    /// Path segment of the snapshot endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Metrics => "metrics",
            Category::Prs => "prs",
            Category::Runs => "runs",
            Category::Findings => "findings",
            Category::Policies => "policies",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// SSE event name for this category's deltas.
    pub fn delta_event_name(&self) -> &'static str {
        match self {
            Category::Metrics => "metrics_delta",
            Category::Prs => "prs_delta",
            Category::Runs => "runs_delta",
            Category::Findings => "findings_delta",
            Category::Policies => "policies_delta",
        }
    }

    pub fn from_delta_event_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.delta_event_name() == name)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification that one category's underlying data changed. Carries no row
/// data; consumers re-fetch the snapshot instead of patching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DeltaEventWire", into = "DeltaEventWire")]
pub struct DeltaEvent {
    pub category: Category,
    pub timestamp_ms: i64,
    pub payload: Value,
}

/// JSON body of a delta event on the wire: `{"type": "findings_delta", ...}`.
#[derive(Serialize, Deserialize)]
struct DeltaEventWire {
    #[serde(rename = "type")]
    kind: String,
    timestamp: i64,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<DeltaEventWire> for DeltaEvent {
    type Error = String;

    fn try_from(w: DeltaEventWire) -> Result<Self, Self::Error> {
        let category = Category::from_delta_event_name(&w.kind)
            .ok_or_else(|| format!("unknown delta event type: {}", w.kind))?;
        Ok(DeltaEvent {
            category,
            timestamp_ms: w.timestamp,
            payload: w.payload,
        })
    }
}

impl From<DeltaEvent> for DeltaEventWire {
    fn from(e: DeltaEvent) -> Self {
        DeltaEventWire {
            kind: e.category.delta_event_name().to_string(),
            timestamp: e.timestamp_ms,
            payload: e.payload,
        }
    }
}

/// Everything the delta stream can deliver.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// First event after the connection is established.
    Connected { timestamp_ms: i64 },
    /// Periodic liveness signal; updates the last-event timestamp only.
    Heartbeat { timestamp_ms: i64 },
    Delta(DeltaEvent),
}

#[derive(Serialize, Deserialize)]
struct TimestampBody {
    timestamp: i64,
}

impl StreamEvent {
    pub const CONNECTED: &'static str = "connected";
    pub const HEARTBEAT: &'static str = "heartbeat";

    /// SSE `event:` name and JSON `data:` body for this event.
    pub fn to_sse_parts(&self) -> (String, String) {
        match self {
            StreamEvent::Connected { timestamp_ms } => (
                Self::CONNECTED.to_string(),
                serde_json::to_string(&TimestampBody {
                    timestamp: *timestamp_ms,
                })
                .unwrap_or_default(),
            ),
            StreamEvent::Heartbeat { timestamp_ms } => (
                Self::HEARTBEAT.to_string(),
                serde_json::to_string(&TimestampBody {
                    timestamp: *timestamp_ms,
                })
                .unwrap_or_default(),
            ),
            StreamEvent::Delta(ev) => (
                ev.category.delta_event_name().to_string(),
                serde_json::to_string(ev).unwrap_or_default(),
            ),
        }
    }

    /// Decode an SSE frame. Returns None for unknown event names or
    /// malformed payloads; callers drop and log, the stream itself survives.
    pub fn from_sse(event: &str, data: &str) -> Option<StreamEvent> {
        match event {
            Self::CONNECTED => {
                let body: TimestampBody = serde_json::from_str(data).ok()?;
                Some(StreamEvent::Connected {
                    timestamp_ms: body.timestamp,
                })
            }
            Self::HEARTBEAT => {
                let body: TimestampBody = serde_json::from_str(data).ok()?;
                Some(StreamEvent::Heartbeat {
                    timestamp_ms: body.timestamp,
                })
            }
            name => {
                Category::from_delta_event_name(name)?;
                let ev: DeltaEvent = serde_json::from_str(data).ok()?;
                Some(StreamEvent::Delta(ev))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_delta_names_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_delta_event_name(c.delta_event_name()), Some(c));
            assert_eq!(Category::from_str_opt(c.as_str()), Some(c));
        }
        assert_eq!(Category::from_delta_event_name("metrics"), None);
    }

    #[test]
    fn delta_event_wire_shape() {
        let ev = DeltaEvent {
            category: Category::Findings,
            timestamp_ms: 1234,
            payload: serde_json::json!({"prId": "pr-9"}),
        };
        let s = serde_json::to_string(&ev).unwrap();
        assert!(s.contains(r#""type":"findings_delta""#));
        assert!(s.contains(r#""timestamp":1234"#));
        let back: DeltaEvent = serde_json::from_str(&s).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn unknown_delta_type_is_rejected() {
        let err = serde_json::from_str::<DeltaEvent>(r#"{"type":"badges_delta","timestamp":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn sse_decode_drops_garbage() {
        assert_eq!(StreamEvent::from_sse("heartbeat", "not json"), None);
        assert_eq!(StreamEvent::from_sse("mystery", "{}"), None);
        assert_eq!(
            StreamEvent::from_sse("heartbeat", r#"{"timestamp":7}"#),
            Some(StreamEvent::Heartbeat { timestamp_ms: 7 })
        );
    }

    #[test]
    fn sse_parts_round_trip() {
        let ev = StreamEvent::Delta(DeltaEvent {
            category: Category::Metrics,
            timestamp_ms: 99,
            payload: serde_json::Value::Null,
        });
        let (name, data) = ev.to_sse_parts();
        assert_eq!(name, "metrics_delta");
        assert_eq!(StreamEvent::from_sse(&name, &data), Some(ev));
    }
}
