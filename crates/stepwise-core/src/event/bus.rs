//! Broadcast bus distributing `Activation`s to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Domain event producers and the cron
//! scheduler publish here; the trigger service subscribes. Publishing with no
//! active subscribers is a no-op.

use serde_json::Value;
use stepwise_types::run::{Activation, EventActivation};
use tokio::sync::broadcast;

/// Multi-producer, multi-consumer activation bus.
///
/// Cloning the bus clones the sender, so every clone publishes into the same
/// channel.
pub struct EventBus {
    sender: broadcast::Sender<Activation>,
}

impl EventBus {
    /// Create a bus whose subscribers may lag by at most `capacity`
    /// activations before dropping the oldest.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a subscriber that receives all future activations.
    pub fn subscribe(&self) -> broadcast::Receiver<Activation> {
        self.sender.subscribe()
    }

    /// Publish an activation to all current subscribers.
    ///
    /// If there are no subscribers, the activation is silently dropped.
    pub fn publish(&self, activation: impl Into<Activation>) {
        let activation = activation.into();
        tracing::trace!(activation = activation.source_label().as_str(), "activation published");
        let _ = self.sender.send(activation);
    }

    /// Publish a domain event `subject.predicate` with `payload`.
    pub fn publish_event(&self, subject: &str, predicate: &str, payload: Value) {
        self.publish(EventActivation::new(subject, predicate, payload));
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use stepwise_types::run::ScheduleTick;

    #[tokio::test]
    async fn publish_and_subscribe_delivers_activation() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish_event("Order", "created", json!({ "id": 1 }));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source_label(), "Order.created");
        assert_eq!(received.payload(), json!({ "id": 1 }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_activation() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ScheduleTick {
            cron: "0 9 * * *".to_string(),
            fired_at: Utc::now(),
        });

        assert!(matches!(rx1.recv().await.unwrap(), Activation::Schedule(_)));
        assert!(matches!(rx2.recv().await.unwrap(), Activation::Schedule(_)));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish_event("Order", "created", Value::Null);
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn lagged_receiver_handles_gracefully() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish_event("Order", "updated", json!({ "seq": i }));
        }

        match rx.try_recv() {
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish_event("Order", "deleted", Value::Null);

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
