use serde_json::Value;
use tokio::sync::broadcast;

/// In-process publisher for task lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context.
    ///
    /// Publishing with no subscribers is not an error; lifecycle events
    /// are observability data, never control flow.
    pub async fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_and_receive() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher
            .publish("task.created", json!({"task_id": "t1"}))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "task.created");
        assert_eq!(event.context["task_id"], "t1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(8);
        publisher.publish("task.created", json!({})).await;
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
