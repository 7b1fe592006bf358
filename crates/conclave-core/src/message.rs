use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a [`Message`] on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary data exchanged between agents.
    Data,
    /// Coordination signals (start, stop, plan announcements).
    Control,
    /// Failure reports.
    Error,
    /// A worker's final result for its task.
    Result,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Data => write!(f, "data"),
            MessageKind::Control => write!(f, "control"),
            MessageKind::Error => write!(f, "error"),
            MessageKind::Result => write!(f, "result"),
        }
    }
}

/// A single message exchanged between two participants.
///
/// Messages are immutable once published; the bus owns the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// Identifier of the sending participant.
    pub sender: String,
    /// Identifier of the receiving participant (or the broadcast address).
    pub receiver: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Message classification.
    pub kind: MessageKind,
    /// UTC timestamp of when the message was published.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a new message stamped with the current time.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        payload: serde_json::Value,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            receiver: receiver.into(),
            payload,
            kind,
            timestamp: Utc::now(),
        }
    }
}
