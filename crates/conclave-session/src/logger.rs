use crate::event::{Event, EventType};
use crate::store::EventStore;
use conclave_core::ConclaveResult;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Agent id used for session-level events.
pub const SYSTEM_AGENT_ID: &str = "system";

const TOOL_RESULT_PREVIEW: usize = 200;
const MESSAGE_PREVIEW: usize = 100;

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Writes events for one agent in one session.
///
/// Every `log_*` call appends exactly one [`Event`] to the store and emits the
/// same information as a `tracing` event.
#[derive(Clone)]
pub struct AgentLogger {
    agent_id: String,
    session_id: String,
    store: Arc<dyn EventStore>,
}

impl AgentLogger {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            store,
        }
    }

    /// Logger for session-level events under [`SYSTEM_AGENT_ID`].
    pub fn system(session_id: impl Into<String>, store: Arc<dyn EventStore>) -> Self {
        Self::new(SYSTEM_AGENT_ID, session_id, store)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// A logger for another agent sharing this session and store.
    pub fn for_agent(&self, agent_id: impl Into<String>) -> Self {
        Self::new(agent_id, self.session_id.clone(), self.store.clone())
    }

    /// Events this agent logged so far.
    pub async fn events(&self) -> ConclaveResult<Vec<Event>> {
        self.store.read(&self.session_id, &self.agent_id).await
    }

    async fn append(&self, event_type: EventType, payload: Value) -> ConclaveResult<Event> {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        let event = Event::new(&self.agent_id, &self.session_id, event_type, payload);
        self.store.append(&event).await?;
        Ok(event)
    }

    pub async fn log_decision(&self, decision: &str, context: Value) -> ConclaveResult<Event> {
        info!(agent_id = %self.agent_id, session_id = %self.session_id, decision, "Decision");
        self.append(
            EventType::Decision,
            json!({"decision": decision, "context": context}),
        )
        .await
    }

    /// Log a completion or tool invocation. The result is stored as a
    /// 200-character preview.
    pub async fn log_tool_call(
        &self,
        tool: &str,
        params: Value,
        result: &str,
    ) -> ConclaveResult<Event> {
        let result_preview = preview(result, TOOL_RESULT_PREVIEW);
        debug!(
            agent_id = %self.agent_id,
            session_id = %self.session_id,
            tool,
            result_len = result.len(),
            "Tool call"
        );
        self.append(
            EventType::ToolCall,
            json!({"tool": tool, "params": params, "result_preview": result_preview}),
        )
        .await
    }

    pub async fn log_metric(&self, name: &str, value: f64, unit: &str) -> ConclaveResult<Event> {
        info!(
            agent_id = %self.agent_id,
            session_id = %self.session_id,
            metric = name,
            value,
            unit,
            "Metric"
        );
        self.append(
            EventType::Metric,
            json!({"metric": name, "value": value, "unit": unit}),
        )
        .await
    }

    /// Log a message exchange. The content is stored as a 100-character
    /// preview.
    pub async fn log_message(
        &self,
        kind: &str,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> ConclaveResult<Event> {
        debug!(
            agent_id = %self.agent_id,
            session_id = %self.session_id,
            kind,
            sender,
            receiver,
            "Message"
        );
        self.append(
            EventType::Message,
            json!({
                "message_type": kind,
                "sender": sender,
                "receiver": receiver,
                "content_preview": preview(content, MESSAGE_PREVIEW),
            }),
        )
        .await
    }

    pub async fn log_task_start(&self, task_id: u32, description: &str) -> ConclaveResult<Event> {
        info!(agent_id = %self.agent_id, session_id = %self.session_id, task_id, "Task started");
        self.append(
            EventType::TaskStart,
            json!({"task_id": task_id, "description": description}),
        )
        .await
    }

    pub async fn log_task_complete(
        &self,
        task_id: u32,
        duration_secs: f64,
        confidence: f32,
    ) -> ConclaveResult<Event> {
        info!(
            agent_id = %self.agent_id,
            session_id = %self.session_id,
            task_id,
            duration_ms = (duration_secs * 1000.0) as u64,
            confidence,
            "Task complete"
        );
        self.append(
            EventType::TaskComplete,
            json!({
                "task_id": task_id,
                "duration_secs": duration_secs,
                "confidence": confidence,
            }),
        )
        .await
    }

    pub async fn log_error(&self, error_text: &str, context: Value) -> ConclaveResult<Event> {
        error!(
            agent_id = %self.agent_id,
            session_id = %self.session_id,
            error = error_text,
            "Agent error"
        );
        self.append(
            EventType::Error,
            json!({"error": error_text, "context": context}),
        )
        .await
    }
}
