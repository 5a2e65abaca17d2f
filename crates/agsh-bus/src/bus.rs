use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agsh_types::{Message, MessageType};
use tokio::sync::mpsc;

/// Default independent-subscriber-queue capacity (§4.1).
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;
/// Default independent-tap capacity (§4.1).
pub const DEFAULT_TAP_CAPACITY: usize = 256;

/// Fan-out pub/sub with independent per-subscriber queues and independent
/// full-history taps. `publish` never blocks: a full subscriber queue gets
/// the message dropped with a warning rather than stalling the publisher.
///
/// Deliberately built on bounded `mpsc` channels, one per registration,
/// rather than `tokio::sync::broadcast` — broadcast lags every receiver
/// uniformly on overflow, which would let one slow subscriber steal
/// capacity from every other subscriber and from the taps.
#[derive(Clone)]
pub struct Bus {
    subscribers: Arc<RwLock<HashMap<MessageType, Vec<mpsc::Sender<Message>>>>>,
    taps: Arc<RwLock<Vec<mpsc::Sender<Message>>>>,
    subscriber_capacity: usize,
    tap_capacity: usize,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_TAP_CAPACITY)
    }

    pub fn with_capacities(subscriber_capacity: usize, tap_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            taps: Arc::new(RwLock::new(Vec::new())),
            subscriber_capacity,
            tap_capacity,
        }
    }

    /// Register an independent receive-only queue for `message_type`.
    pub fn subscribe(&self, message_type: MessageType) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.subscribers
            .write()
            .expect("bus subscriber lock poisoned")
            .entry(message_type)
            .or_default()
            .push(tx);
        rx
    }

    /// Register an independent full-history tap. Taps see every published
    /// message regardless of type and do not consume from the subscriber set.
    pub fn new_tap(&self) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.tap_capacity);
        self.taps.write().expect("bus tap lock poisoned").push(tx);
        rx
    }

    /// Fan `message` to every matching subscriber and every tap. Never
    /// blocks: uses `try_send` and drops-with-a-warning on a full queue.
    pub fn publish(&self, message: Message) {
        let subs = {
            let guard = self.subscribers.read().expect("bus subscriber lock poisoned");
            guard.get(&message.message_type).cloned().unwrap_or_default()
        };
        for tx in &subs {
            if let Err(err) = tx.try_send(message.clone()) {
                tracing::warn!(
                    message_type = %message.message_type,
                    to = %message.to,
                    reason = %drop_reason(&err),
                    "bus: dropped message for subscriber"
                );
            }
        }

        let taps = { self.taps.read().expect("bus tap lock poisoned").clone() };
        for tx in &taps {
            if let Err(err) = tx.try_send(message.clone()) {
                tracing::warn!(
                    message_type = %message.message_type,
                    reason = %drop_reason(&err),
                    "bus: dropped message for tap"
                );
            }
        }
    }

    pub fn subscriber_count(&self, message_type: MessageType) -> usize {
        self.subscribers
            .read()
            .expect("bus subscriber lock poisoned")
            .get(&message_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn tap_count(&self) -> usize {
        self.taps.read().expect("bus tap lock poisoned").len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

fn drop_reason(err: &mpsc::error::TrySendError<Message>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(_) => "full",
        mpsc::error::TrySendError::Closed(_) => "closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::{MessageType, Role, TaskSpec, TaskConstraints};
    use uuid::Uuid;

    fn sample_message() -> Message {
        let spec = TaskSpec {
            task_id: Uuid::new_v4(),
            intent: "test".into(),
            success_criteria: vec![],
            constraints: TaskConstraints {
                scope: None,
                deadline: None,
            },
            raw_input: "test".into(),
        };
        Message::new(Role::Perceiver, Role::Planner, MessageType::TaskSpec, &spec).unwrap()
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = Bus::new();
        let mut rx = bus.subscribe(MessageType::TaskSpec);
        bus.publish(sample_message());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message_type, MessageType::TaskSpec);
    }

    #[tokio::test]
    async fn tap_receives_independently_of_subscriber() {
        let bus = Bus::new();
        let mut tap = bus.new_tap();
        // no subscriber registered at all
        bus.publish(sample_message());
        let received = tap.recv().await.unwrap();
        assert_eq!(received.message_type, MessageType::TaskSpec);
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_without_blocking_publisher() {
        let bus = Bus::with_capacities(1, 1);
        let _rx = bus.subscribe(MessageType::TaskSpec); // never drained
        bus.publish(sample_message());
        bus.publish(sample_message()); // queue already full, should just drop
        bus.publish(sample_message());
    }

    #[tokio::test]
    async fn one_slow_subscriber_does_not_starve_another() {
        let bus = Bus::with_capacities(1, 64);
        let _slow = bus.subscribe(MessageType::TaskSpec); // never drained
        let mut fast = bus.subscribe(MessageType::TaskSpec);
        bus.publish(sample_message());
        bus.publish(sample_message());
        // the fast subscriber still got its first message even though the
        // slow one dropped its second
        assert!(fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn messages_within_one_subscriber_arrive_in_publish_order() {
        let bus = Bus::new();
        let mut rx = bus.subscribe(MessageType::TaskSpec);
        let ids: Vec<_> = (0..5)
            .map(|_| {
                let m = sample_message();
                bus.publish(m.clone());
                m.id
            })
            .collect();
        for expected in ids {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.id, expected);
        }
    }
}
