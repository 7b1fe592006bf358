use crate::message::{Message, MessageKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Receiver address that reaches every participant.
///
/// Publishing to it delivers the message to every subscriber; subscribing to it
/// observes every message published on the bus.
pub const BROADCAST: &str = "*";

/// Callback invoked synchronously on the publishing thread.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Append-only message bus shared by every participant of a session.
///
/// Every published message is recorded before `publish` returns, so history is
/// never dropped or reordered. Subscribers run after the history lock is
/// released, which lets a callback publish in turn.
pub struct MessageBus {
    history: Mutex<Vec<Message>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl MessageBus {
    /// Create an empty bus with no subscribers.
    pub fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a message and notify matching subscribers.
    pub fn publish(
        &self,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        payload: serde_json::Value,
        kind: MessageKind,
    ) -> Message {
        let message = Message::new(sender, receiver, payload, kind);

        let targets: Vec<Subscriber> = {
            let mut history = self.history.lock();
            history.push(message.clone());

            let subscribers = self.subscribers.read();
            if message.receiver == BROADCAST {
                subscribers.values().flatten().cloned().collect()
            } else {
                subscribers
                    .get(&message.receiver)
                    .into_iter()
                    .chain(subscribers.get(BROADCAST))
                    .flatten()
                    .cloned()
                    .collect()
            }
        };

        debug!(
            sender = %message.sender,
            receiver = %message.receiver,
            kind = %message.kind,
            subscribers = targets.len(),
            "bus publish"
        );

        for callback in &targets {
            callback(&message);
        }

        message
    }

    /// Register a callback for every message addressed to `receiver`.
    pub fn subscribe<F>(&self, receiver: impl Into<String>, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(receiver.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Messages addressed to `receiver` (including broadcasts), in publish order.
    pub fn poll(&self, receiver: &str, kind: Option<MessageKind>) -> Vec<Message> {
        self.history
            .lock()
            .iter()
            .filter(|m| m.receiver == receiver || m.receiver == BROADCAST)
            .filter(|m| kind.map_or(true, |k| m.kind == k))
            .cloned()
            .collect()
    }

    /// Full message history in publish order.
    pub fn export(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    /// Number of messages published so far.
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    /// Whether nothing has been published yet.
    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Drop the recorded history. Subscribers stay registered.
    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_and_poll() {
        let bus = MessageBus::new();
        bus.publish("agent_1", "agent_2", json!("Hello"), MessageKind::Data);

        let messages = bus.poll("agent_2", None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "agent_1");
        assert_eq!(messages[0].payload, json!("Hello"));
        assert!(bus.poll("agent_1", None).is_empty());
    }

    #[test]
    fn test_poll_by_kind() {
        let bus = MessageBus::new();
        bus.publish("agent_1", "agent_2", json!("Data message"), MessageKind::Data);
        bus.publish("agent_1", "agent_2", json!("Control message"), MessageKind::Control);

        let data = bus.poll("agent_2", Some(MessageKind::Data));
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload, json!("Data message"));
    }

    #[test]
    fn test_export_preserves_order() {
        let bus = MessageBus::new();
        for i in 0..10 {
            bus.publish(format!("s{}", i % 3), format!("r{}", i % 2), json!(i), MessageKind::Data);
        }
        let trace = bus.export();
        let payloads: Vec<i64> = trace.iter().map(|m| m.payload.as_i64().unwrap()).collect();
        assert_eq!(payloads, (0..10).collect::<Vec<_>>());

        let r0: Vec<i64> = bus
            .poll("r0", None)
            .iter()
            .map(|m| m.payload.as_i64().unwrap())
            .collect();
        assert_eq!(r0, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_subscriber_called_at_publish_time() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe("lead", move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("w1", "lead", json!({}), MessageKind::Result);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        bus.publish("w1", "other", json!({}), MessageKind::Result);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b"] {
            let counter = hits.clone();
            bus.subscribe(name, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish("lead", BROADCAST, json!("stop"), MessageKind::Control);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.poll("a", Some(MessageKind::Control)).len(), 1);
        assert_eq!(bus.poll("b", None).len(), 1);
    }

    #[test]
    fn test_callback_may_publish() {
        let bus = Arc::new(MessageBus::new());
        let inner = bus.clone();
        bus.subscribe("echo", move |msg| {
            inner.publish("echo", msg.sender.clone(), msg.payload.clone(), MessageKind::Data);
        });

        bus.publish("caller", "echo", json!("ping"), MessageKind::Data);
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.poll("caller", None)[0].payload, json!("ping"));
    }

    #[test]
    fn test_clear() {
        let bus = MessageBus::new();
        bus.publish("a", "b", json!("Test"), MessageKind::Data);
        bus.clear();
        assert!(bus.is_empty());
        assert!(bus.poll("b", None).is_empty());
    }
}
