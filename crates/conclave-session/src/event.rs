use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of a logged [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Decision,
    ToolCall,
    Metric,
    Message,
    TaskStart,
    TaskComplete,
    Error,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 7] = [
        EventType::Decision,
        EventType::ToolCall,
        EventType::Metric,
        EventType::Message,
        EventType::TaskStart,
        EventType::TaskComplete,
        EventType::Error,
    ];

    /// The snake_case name used on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Decision => "decision",
            EventType::ToolCall => "tool_call",
            EventType::Metric => "metric",
            EventType::Message => "message",
            EventType::TaskStart => "task_start",
            EventType::TaskComplete => "task_complete",
            EventType::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub agent_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        event_type: EventType,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Payload field lookup.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_names() {
        for ty in EventType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn test_event_serialization() {
        let mut payload = Map::new();
        payload.insert("decision".into(), json!("spawn 3 workers"));
        let event = Event::new("lead_agent", "s1", EventType::Decision, payload);

        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"event_type\":\"decision\""));
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.get("decision"), Some(&json!("spawn 3 workers")));
    }
}
